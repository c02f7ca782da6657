//! Structured `key=value` payload.
//!
//! Lines look like an HTTP service's request log:
//!
//! ```text
//! ts=2024-05-01T12:00:00.000000000Z level=info method=GET path=/alfa status=200 duration=1.204ms client=10.1.2.3 bytes=512 trace_id=5c2e... msg="request completed"
//! ```

use core::fmt;

use rand::Rng;
use time::OffsetDateTime;

use crate::{
    Render,
    common::{self, HexId, IpV4, Latency, Level, Method, Path, StatusCode, Timestamp},
};

#[derive(Debug)]
struct Member {
    timestamp: Timestamp,
    level: Level,
    method: Method,
    path: Path,
    status_code: StatusCode,
    duration: Latency,
    client: IpV4,
    bytes: u16,
    trace_id: HexId<16>,
    message: &'static str,
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ts={} level={} method={} path={} status={} duration={} client={} bytes={} trace_id={} msg=\"{}\"",
            self.timestamp,
            self.level,
            self.method,
            self.path,
            self.status_code.0,
            self.duration,
            self.client,
            self.bytes,
            self.trace_id,
            self.message
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// Logfmt payload
pub struct Logfmt;

impl Render for Logfmt {
    fn render<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> String
    where
        R: Rng + ?Sized,
    {
        let status_code: StatusCode = rng.random();
        Member {
            timestamp: Timestamp::Rfc3339Nanos(timestamp),
            level: status_code.level(),
            method: rng.random(),
            path: rng.random(),
            status_code,
            duration: rng.random(),
            client: rng.random(),
            bytes: rng.random(),
            trace_id: rng.random(),
            message: common::message(rng),
        }
        .to_string()
    }
}

#[cfg(test)]
mod test {
    use rand::{SeedableRng, rngs::SmallRng};
    use time::macros::datetime;

    use super::Logfmt;
    use crate::Render;

    // Every space separated token before the quoted message is a key=value
    // pair.
    #[test]
    fn pairs_are_well_formed() {
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..100 {
            let line = Logfmt.render(&mut rng, datetime!(2024-05-01 12:00:00 UTC));
            assert!(line.starts_with("ts=2024-05-01T12:00:00.000000000Z level="), "{line}");
            let (pairs, message) = line.split_once(" msg=\"").expect("message present");
            assert!(message.ends_with('"'), "{line}");
            for pair in pairs.split(' ') {
                let (key, value) = pair.split_once('=').expect("key=value");
                assert!(!key.is_empty() && !value.is_empty(), "{line}");
            }
        }
    }
}
