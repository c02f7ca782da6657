//! Syslog payloads, BSD (RFC 3164) and IETF (RFC 5424) flavors.

use rand::Rng;
use time::OffsetDateTime;

use crate::{
    Render,
    common::{self, HexId, Timestamp},
};

#[derive(Debug, Default, Clone, Copy)]
/// BSD syslog, `<PRI>Mmm dd hh:mm:ss HOST APP[PID]: MSG`
pub struct Syslog3164;

impl Render for Syslog3164 {
    fn render<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> String
    where
        R: Rng + ?Sized,
    {
        let priority: u8 = rng.random_range(0..=191);
        let hostname = common::pick(rng, &common::HOSTNAMES);
        let app_name = common::pick(rng, &common::APP_NAMES);
        let pid: u16 = rng.random_range(100..=9_999);
        let message = common::message(rng);
        format!(
            "<{priority}>{} {hostname} {app_name}[{pid}]: {message}",
            Timestamp::Bsd(timestamp)
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// IETF syslog,
/// `<PRI>1 TIMESTAMP HOST APP PROCID MSGID [SD] MSG`
pub struct Syslog5424;

impl Render for Syslog5424 {
    fn render<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> String
    where
        R: Rng + ?Sized,
    {
        let priority: u8 = rng.random_range(0..=191);
        let hostname = common::pick(rng, &common::HOSTNAMES);
        let app_name = common::pick(rng, &common::APP_NAMES);
        let procid: u16 = rng.random_range(100..=9_999);
        let msgid: u16 = rng.random_range(1..=999);
        let request_id: HexId<8> = rng.random();
        let message = common::message(rng);
        format!(
            "<{priority}>1 {} {hostname} {app_name} {procid} ID{msgid} [meta request_id=\"{request_id}\"] {message}",
            Timestamp::Rfc3339Millis(timestamp)
        )
    }
}
