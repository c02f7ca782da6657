//! Apache web server log payloads: common, combined and error formats.

use core::fmt;

use rand::Rng;
use time::OffsetDateTime;

use crate::{
    Render,
    common::{self, IpV4, Method, Path, Protocol, StatusCode, Timestamp},
};

const ERROR_MODULES: [&str; 5] = ["core", "proxy", "ssl", "authz_core", "mpm_event"];
const ERROR_LEVELS: [&str; 4] = ["notice", "warn", "error", "crit"];

#[derive(Debug)]
struct Request {
    host: IpV4,
    user: &'static str,
    timestamp: Timestamp,
    method: Method,
    path: Path,
    protocol: Protocol,
    status_code: StatusCode,
    bytes_out: u16,
}

impl Request {
    fn generate<R>(rng: &mut R, timestamp: OffsetDateTime) -> Self
    where
        R: Rng + ?Sized,
    {
        Request {
            host: rng.random(),
            user: common::user(rng),
            timestamp: Timestamp::Clf(timestamp),
            method: rng.random(),
            path: rng.random(),
            protocol: rng.random(),
            status_code: rng.random(),
            bytes_out: rng.random(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} [{}] \"{} {} {}\" {} {}",
            self.host,
            self.user,
            self.timestamp,
            self.method,
            self.path,
            self.protocol,
            self.status_code.0,
            self.bytes_out
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// Apache Common Log Format:
/// `host ident user [time] "request" status bytes`
pub struct ApacheCommon;

impl Render for ApacheCommon {
    fn render<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> String
    where
        R: Rng + ?Sized,
    {
        Request::generate(rng, timestamp).to_string()
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// Apache Combined Log Format, the common format followed by the quoted
/// referer and user agent.
pub struct ApacheCombined;

impl Render for ApacheCombined {
    fn render<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> String
    where
        R: Rng + ?Sized,
    {
        let request = Request::generate(rng, timestamp);
        format!(
            "{request} \"{}\" \"{}\"",
            common::referer(rng),
            common::user_agent(rng)
        )
    }
}

#[derive(Debug)]
struct ErrorEntry {
    timestamp: Timestamp,
    module: &'static str,
    level: &'static str,
    pid: u16,
    tid: u32,
    client: IpV4,
    port: u16,
    code: u16,
    message: &'static str,
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}:{}] [pid {}:tid {}] [client {}:{}] AH{:05}: {}",
            self.timestamp,
            self.module,
            self.level,
            self.pid,
            self.tid,
            self.client,
            self.port,
            self.code,
            self.message
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// Apache error log format.
pub struct ApacheError;

impl Render for ApacheError {
    fn render<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> String
    where
        R: Rng + ?Sized,
    {
        ErrorEntry {
            timestamp: Timestamp::ApacheError(timestamp),
            module: *common::pick(rng, &ERROR_MODULES),
            level: *common::pick(rng, &ERROR_LEVELS),
            pid: rng.random_range(100..=32_000),
            tid: rng.random(),
            client: rng.random(),
            port: rng.random_range(1_024..=65_535),
            code: rng.random_range(0..=10_000),
            message: common::message(rng),
        }
        .to_string()
    }
}

#[cfg(test)]
mod test {
    use rand::{SeedableRng, rngs::SmallRng};
    use time::macros::datetime;

    use super::{ApacheCombined, ApacheCommon, ApacheError};
    use crate::Render;

    #[test]
    fn common_layout() {
        let mut rng = SmallRng::seed_from_u64(3);
        let line = ApacheCommon.render(&mut rng, datetime!(2024-05-01 12:00:00 UTC));
        assert!(line.contains(" [01/May/2024:12:00:00 +0000] \""), "{line}");
        assert_eq!(line.matches('"').count(), 2, "{line}");
    }

    #[test]
    fn combined_extends_common() {
        let mut rng = SmallRng::seed_from_u64(3);
        let line = ApacheCombined.render(&mut rng, datetime!(2024-05-01 12:00:00 UTC));
        assert_eq!(line.matches('"').count(), 6, "{line}");
    }

    #[test]
    fn error_layout() {
        let mut rng = SmallRng::seed_from_u64(3);
        let line = ApacheError.render(&mut rng, datetime!(2024-05-01 12:00:00 UTC));
        assert!(line.starts_with("[Wed May 01 12:00:00.000000 2024] ["), "{line}");
        assert!(line.contains("[client "), "{line}");
    }
}
