//! Field distributions shared by every line format.
//!
//! Values are drawn from the caller's RNG only. Nothing in this module reaches
//! for thread-local or global randomness, which keeps output reproducible from
//! a seed.

use core::fmt;

use rand::{Rng, distr::StandardUniform, prelude::Distribution};
use time::{Month, OffsetDateTime, Weekday};

const PATH_NAMES: [&str; 25] = [
    "alfa", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliett",
    "kilo", "lima", "mike", "november", "oscar", "papa", "quebec", "romeo", "sierra", "tango",
    "uniform", "victor", "xray", "yankee", "zulu",
];

const STATUS_CODES: [u16; 22] = [
    200, 200, 200, 200, 200, 201, 202, 204, 301, 302, 304, 400, 401, 403, 404, 404, 405, 409, 429,
    500, 502, 503,
];

const USER_NAMES: [&str; 8] = [
    "-", "-", "-", "kiera", "otto", "ramona", "svc-ingest", "deploy",
];

pub(crate) const HOSTNAMES: [&str; 6] = [
    "ingest-01.prod",
    "ingest-02.prod",
    "edge.example.com",
    "api.internal",
    "cache-a.zone-b",
    "localhost",
];

pub(crate) const APP_NAMES: [&str; 6] = [
    "nginx", "envoy", "gateway", "scheduler", "querier", "distributor",
];

const USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "curl/8.5.0",
    "Go-http-client/1.1",
    "python-requests/2.31.0",
];

const REFERERS: [&str; 5] = [
    "-",
    "https://www.example.com/",
    "https://search.example.org/?q=logs",
    "https://docs.example.net/start",
    "http://localhost:3000/dashboard",
];

const MESSAGES: [&str; 12] = [
    "request completed",
    "cache miss, fetching from origin",
    "connection reset by peer",
    "upstream timed out while reading response header",
    "retrying flush after transient failure",
    "rebalancing partitions",
    "client closed connection before response",
    "token refreshed",
    "slow query detected",
    "compaction finished",
    "configuration reloaded",
    "permission denied for requested resource",
];

/// Choose one element of a non-empty constant table.
pub(crate) fn pick<'a, R, T>(rng: &mut R, table: &'a [T]) -> &'a T
where
    R: Rng + ?Sized,
{
    &table[rng.random_range(0..table.len())]
}

pub(crate) fn user<R>(rng: &mut R) -> &'static str
where
    R: Rng + ?Sized,
{
    *pick(rng, &USER_NAMES)
}

pub(crate) fn user_agent<R>(rng: &mut R) -> &'static str
where
    R: Rng + ?Sized,
{
    *pick(rng, &USER_AGENTS)
}

pub(crate) fn referer<R>(rng: &mut R) -> &'static str
where
    R: Rng + ?Sized,
{
    *pick(rng, &REFERERS)
}

pub(crate) fn message<R>(rng: &mut R) -> &'static str
where
    R: Rng + ?Sized,
{
    *pick(rng, &MESSAGES)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StatusCode(pub(crate) u16);

impl Distribution<StatusCode> for StandardUniform {
    fn sample<R>(&self, rng: &mut R) -> StatusCode
    where
        R: Rng + ?Sized,
    {
        StatusCode(*pick(rng, &STATUS_CODES))
    }
}

impl StatusCode {
    pub(crate) fn level(self) -> Level {
        match self.0 {
            500..=u16::MAX => Level::Error,
            400..=499 => Level::Warn,
            _ => Level::Info,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Distribution<Level> for StandardUniform {
    fn sample<R>(&self, rng: &mut R) -> Level
    where
        R: Rng + ?Sized,
    {
        match rng.random_range(0..10) {
            0 => Level::Debug,
            1..=6 => Level::Info,
            7 | 8 => Level::Warn,
            _ => Level::Error,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Protocol {
    Http10,
    Http11,
    Http20,
}

impl Distribution<Protocol> for StandardUniform {
    fn sample<R>(&self, rng: &mut R) -> Protocol
    where
        R: Rng + ?Sized,
    {
        match rng.random_range(0..3) {
            0 => Protocol::Http10,
            1 => Protocol::Http11,
            _ => Protocol::Http20,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Http10 => "HTTP/1.0",
            Protocol::Http11 => "HTTP/1.1",
            Protocol::Http20 => "HTTP/2.0",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Method {
    Get,
    Put,
    Post,
    Delete,
    Patch,
    Head,
}

impl Distribution<Method> for StandardUniform {
    fn sample<R>(&self, rng: &mut R) -> Method
    where
        R: Rng + ?Sized,
    {
        // Reads dominate real access logs.
        match rng.random_range(0..10) {
            0..=5 => Method::Get,
            6 => Method::Post,
            7 => Method::Put,
            8 => Method::Delete,
            9 if rng.random() => Method::Patch,
            _ => Method::Head,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Path {
    components: [Option<&'static str>; 4],
}

impl Distribution<Path> for StandardUniform {
    fn sample<R>(&self, rng: &mut R) -> Path
    where
        R: Rng + ?Sized,
    {
        let total_components: usize = rng.random_range(1..=4);
        let mut components = [None; 4];
        for idx in components.iter_mut().take(total_components) {
            *idx = Some(*pick(rng, &PATH_NAMES));
        }
        Path { components }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for component in self.components.iter().flatten() {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct IpV4 {
    zero: u8,
    one: u8,
    two: u8,
    three: u8,
}

impl Distribution<IpV4> for StandardUniform {
    fn sample<R>(&self, rng: &mut R) -> IpV4
    where
        R: Rng + ?Sized,
    {
        IpV4 {
            zero: rng.random_range(1..=223),
            one: rng.random(),
            two: rng.random(),
            three: rng.random_range(1..=254),
        }
    }
}

impl fmt::Display for IpV4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.zero, self.one, self.two, self.three)
    }
}

/// A request duration, in microseconds, bounded to one minute.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Latency(u32);

impl Distribution<Latency> for StandardUniform {
    fn sample<R>(&self, rng: &mut R) -> Latency
    where
        R: Rng + ?Sized,
    {
        // Mostly fast, occasionally very slow.
        if rng.random_ratio(1, 20) {
            Latency(rng.random_range(1_000_000..=60_000_000))
        } else {
            Latency(rng.random_range(100..=250_000))
        }
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = self.0;
        if micros >= 1_000_000 {
            write!(f, "{}.{:03}s", micros / 1_000_000, (micros % 1_000_000) / 1_000)
        } else {
            write!(f, "{}.{:03}ms", micros / 1_000, micros % 1_000)
        }
    }
}

/// A lowercase hex identifier of `N` bytes, as used for trace and request ids.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HexId<const N: usize>([u8; N]);

impl<const N: usize> Distribution<HexId<N>> for StandardUniform {
    fn sample<R>(&self, rng: &mut R) -> HexId<N>
    where
        R: Rng + ?Sized,
    {
        let mut bytes = [0; N];
        rng.fill(&mut bytes[..]);
        HexId(bytes)
    }
}

impl<const N: usize> fmt::Display for HexId<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

fn month_abbreviation(month: Month) -> &'static str {
    match month {
        Month::January => "Jan",
        Month::February => "Feb",
        Month::March => "Mar",
        Month::April => "Apr",
        Month::May => "May",
        Month::June => "Jun",
        Month::July => "Jul",
        Month::August => "Aug",
        Month::September => "Sep",
        Month::October => "Oct",
        Month::November => "Nov",
        Month::December => "Dec",
    }
}

fn weekday_abbreviation(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Monday => "Mon",
        Weekday::Tuesday => "Tue",
        Weekday::Wednesday => "Wed",
        Weekday::Thursday => "Thu",
        Weekday::Friday => "Fri",
        Weekday::Saturday => "Sat",
        Weekday::Sunday => "Sun",
    }
}

/// Renderings of a line's timestamp. All are UTC and infallible.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Timestamp {
    /// `2006-01-02T15:04:05.000000000Z`
    Rfc3339Nanos(OffsetDateTime),
    /// `2006-01-02T15:04:05.000Z`
    Rfc3339Millis(OffsetDateTime),
    /// `02/Jan/2006:15:04:05 +0000`
    Clf(OffsetDateTime),
    /// `Mon Jan 02 15:04:05.000000 2006`
    ApacheError(OffsetDateTime),
    /// `Jan  2 15:04:05`
    Bsd(OffsetDateTime),
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Timestamp::Rfc3339Nanos(t) => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
                t.year(),
                u8::from(t.month()),
                t.day(),
                t.hour(),
                t.minute(),
                t.second(),
                t.nanosecond()
            ),
            Timestamp::Rfc3339Millis(t) => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
                t.year(),
                u8::from(t.month()),
                t.day(),
                t.hour(),
                t.minute(),
                t.second(),
                t.millisecond()
            ),
            Timestamp::Clf(t) => write!(
                f,
                "{:02}/{}/{:04}:{:02}:{:02}:{:02} +0000",
                t.day(),
                month_abbreviation(t.month()),
                t.year(),
                t.hour(),
                t.minute(),
                t.second()
            ),
            Timestamp::ApacheError(t) => write!(
                f,
                "{} {} {:02} {:02}:{:02}:{:02}.{:06} {:04}",
                weekday_abbreviation(t.weekday()),
                month_abbreviation(t.month()),
                t.day(),
                t.hour(),
                t.minute(),
                t.second(),
                t.microsecond(),
                t.year()
            ),
            Timestamp::Bsd(t) => write!(
                f,
                "{} {:>2} {:02}:{:02}:{:02}",
                month_abbreviation(t.month()),
                t.day(),
                t.hour(),
                t.minute(),
                t.second()
            ),
        }
    }
}
