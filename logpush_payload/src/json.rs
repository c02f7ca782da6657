//! JSON object payload, one object per line.

use rand::Rng;
use serde_json::json;
use time::OffsetDateTime;

use crate::{
    Render,
    common::{self, HexId, IpV4, Latency, Level, Method, Path, Protocol, StatusCode, Timestamp},
};

#[derive(Debug, Default, Clone, Copy)]
/// JSON payload
pub struct Json;

impl Render for Json {
    fn render<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> String
    where
        R: Rng + ?Sized,
    {
        let host: IpV4 = rng.random();
        let level: Level = rng.random();
        let method: Method = rng.random();
        let path: Path = rng.random();
        let protocol: Protocol = rng.random();
        let status: StatusCode = rng.random();
        let latency: Latency = rng.random();
        let bytes: u16 = rng.random();
        let request_id: HexId<8> = rng.random();
        json!({
            "time": Timestamp::Rfc3339Nanos(timestamp).to_string(),
            "level": level.to_string(),
            "host": host.to_string(),
            "user-identifier": common::user(rng),
            "method": method.to_string(),
            "request": path.to_string(),
            "protocol": protocol.to_string(),
            "status": status.0,
            "bytes": bytes,
            "latency": latency.to_string(),
            "referer": common::referer(rng),
            "request_id": request_id.to_string(),
        })
        .to_string()
    }
}
