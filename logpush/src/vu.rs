//! The per virtual user tick engine.
//!
//! A [`VirtualUser`] owns all of its mutable state: rate credit, churn
//! counters, random streams and the line buffer. Ticks of one virtual user
//! are sequential, ticks of different virtual users share nothing but the
//! [`Session`].
//!
//! ## Metrics
//!
//! `lines_emitted`: Lines synthesized
//! `bytes_emitted`: Line bytes synthesized, framing excluded
//!
//! Push metrics are documented in [`crate::push`].

use std::time::Duration;

use logpush_payload::{Synthesizer, truncate};
use logpush_throttle::{Clock, Quota, Scheduler};
use metrics::counter;
use rand::rngs::StdRng;
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::{
    Session, VuId, churn,
    codec::{Batch, Entry},
    push::{PushError, Pusher},
    rng::Purpose,
    spec::{self, VU_LABEL, VuSpec},
    stream::{Registry, StreamKey},
};

/// Outcome of a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickResult {
    /// Lines synthesized this tick
    pub lines_emitted: u64,
    /// Line bytes synthesized this tick
    pub bytes_emitted: u64,
    /// Failures of pushes made during this tick
    pub push_errors: Vec<PushError>,
}

/// One virtual user, created by [`Session::assign_spec`].
#[derive(Debug)]
pub struct VirtualUser {
    id: VuId,
    tenant: Option<String>,
    scheduler: Scheduler,
    synthesizer: Synthesizer,
    churn: churn::Engine,
    registry: Registry,
    churned: Vec<(String, u64)>,
    keys: Vec<StreamKey>,
    lines_rng: StdRng,
    routing_rng: StdRng,
    pusher: Pusher,
    clock: Box<dyn Clock + Send + Sync>,
    last_tick: u64,
    epoch: OffsetDateTime,
    logical: Duration,
    buffer: Batch,
    buffer_age: Duration,
    labels: Vec<(String, String)>,
}

/// Position of step `step` of `steps` within an interval of `span`.
fn spread(span: Duration, step: u64, steps: u64) -> Duration {
    if steps == 0 {
        return Duration::ZERO;
    }
    let nanos = span.as_nanos() * u128::from(step) / u128::from(steps);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn at(epoch: OffsetDateTime, offset: Duration) -> OffsetDateTime {
    let offset = time::Duration::try_from(offset).unwrap_or(time::Duration::MAX);
    epoch.saturating_add(offset)
}

impl VirtualUser {
    pub(crate) fn new(
        session: &Session,
        id: VuId,
        spec: VuSpec,
        clock: Box<dyn Clock + Send + Sync>,
    ) -> Result<Self, spec::Error> {
        spec.validate()?;
        let scheduler = Scheduler::new(spec.rate)?;
        let synthesizer = Synthesizer::new(spec.format, spec.size)?;
        let tenant = session.tenant_for(id, spec.tenant);
        let mut stream_labels = spec.labels;
        if session.config().vu_label {
            if stream_labels.contains_key(VU_LABEL) || spec.churning_labels.contains_key(VU_LABEL)
            {
                return Err(spec::Error::ReservedLabel(VU_LABEL));
            }
            stream_labels.insert(VU_LABEL.to_string(), id.to_string());
        }
        let registry = Registry::new(tenant.clone(), stream_labels, spec.streams);
        let churn = churn::Engine::new(&spec.churning_labels);

        let labels = vec![
            ("component".to_string(), "generator".to_string()),
            ("component_name".to_string(), "logpush".to_string()),
            ("vu".to_string(), id.to_string()),
        ];
        let pool = session.pool();
        let pusher = Pusher::new(id, pool.stream(id, Purpose::Jitter), labels.clone());
        let last_tick = clock.ticks_elapsed();

        debug!(vu = %id, tenant = tenant.as_deref().unwrap_or_default(), "Assigned spec");
        Ok(Self {
            id,
            tenant,
            scheduler,
            synthesizer,
            churn,
            registry,
            churned: Vec::new(),
            keys: Vec::new(),
            lines_rng: pool.stream(id, Purpose::Lines),
            routing_rng: pool.stream(id, Purpose::Streams),
            pusher,
            clock,
            last_tick,
            epoch: session.epoch(),
            logical: Duration::ZERO,
            buffer: Batch::new(),
            buffer_age: Duration::ZERO,
            labels,
        })
    }

    /// The virtual user's id.
    #[must_use]
    pub fn id(&self) -> VuId {
        self.id
    }

    /// The tenant every stream of this virtual user is pushed under.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Keys of every stream as of the last tick, indexed by stream index.
    #[must_use]
    pub fn stream_keys(&self) -> &[StreamKey] {
        &self.keys
    }

    /// Churning label values as of the last tick.
    #[must_use]
    pub fn churned(&self) -> &[(String, u64)] {
        self.churn.current()
    }

    /// Logical time, the epoch plus all elapsed time fed to the virtual user.
    #[must_use]
    pub fn logical_time(&self) -> OffsetDateTime {
        at(self.epoch, self.logical)
    }

    /// Lines synthesized but not yet pushed.
    #[must_use]
    pub fn buffered_lines(&self) -> u64 {
        self.buffer.lines()
    }

    /// Lines the backend has acknowledged since the virtual user was created.
    #[must_use]
    pub fn acknowledged_lines(&self) -> u64 {
        self.pusher.acknowledged()
    }

    /// Tick once, measuring elapsed time on the virtual user's clock.
    pub async fn tick(&mut self, session: &Session) -> TickResult {
        let now = self.clock.ticks_elapsed();
        let elapsed = Duration::from_micros(now.saturating_sub(self.last_tick));
        self.last_tick = self.last_tick.max(now);
        self.tick_elapsed(session, elapsed).await
    }

    /// Tick once as if `elapsed` had passed since the previous tick.
    ///
    /// Synthesizes this tick's quota, buffers it and pushes the buffer if it
    /// is old or large enough. Push failures are reported, never raised.
    pub async fn tick_elapsed(&mut self, session: &Session, elapsed: Duration) -> TickResult {
        let quota = self.scheduler.quota(elapsed);

        let churned = self.churn.churn();
        if self.keys.is_empty() || churned != self.churned.as_slice() {
            self.keys = self.registry.resolve_all(churned);
            self.churned = churned.to_vec();
            trace!(vu = %self.id, streams = self.keys.len(), "Resolved stream keys");
        }

        let start = self.logical;
        let mut result = TickResult::default();
        match quota {
            Quota::Lines(lines) => {
                for step in 0..lines {
                    let offset = start.saturating_add(spread(elapsed, step, lines));
                    let line = self.synthesize(offset);
                    result.bytes_emitted += line.len() as u64;
                    self.buffer_line(offset, line);
                }
                result.lines_emitted = lines;
            }
            Quota::Bytes(budget) => {
                while result.bytes_emitted < budget {
                    let offset = start.saturating_add(spread(elapsed, result.bytes_emitted, budget));
                    let mut line = self.synthesize(offset);
                    let remaining = budget - result.bytes_emitted;
                    if line.len() as u64 > remaining {
                        truncate(&mut line, usize::try_from(remaining).unwrap_or(usize::MAX));
                    }
                    if line.is_empty() {
                        break;
                    }
                    result.bytes_emitted += line.len() as u64;
                    result.lines_emitted += 1;
                    self.buffer_line(offset, line);
                }
            }
        }
        self.logical = self.logical.saturating_add(elapsed);
        self.buffer_age = self.buffer_age.saturating_add(elapsed);
        counter!("lines_emitted", &self.labels).increment(result.lines_emitted);
        counter!("bytes_emitted", &self.labels).increment(result.bytes_emitted);
        trace!(
            vu = %self.id,
            lines = result.lines_emitted,
            bytes = result.bytes_emitted,
            "Tick"
        );

        if self.buffer_age >= session.config().batch_wait()
            || self.buffer.bytes() >= session.ceiling() as u64
        {
            result.push_errors = self.flush(session).await;
        }
        result
    }

    /// Push everything buffered, regardless of age or size.
    pub async fn flush(&mut self, session: &Session) -> Vec<PushError> {
        self.buffer_age = Duration::ZERO;
        let batch = std::mem::take(&mut self.buffer);
        if batch.is_empty() {
            return Vec::new();
        }
        debug!(vu = %self.id, lines = batch.lines(), bytes = batch.bytes(), "Flushing");
        self.pusher.push(session, batch).await
    }

    fn synthesize(&mut self, offset: Duration) -> String {
        let timestamp = at(self.epoch, offset);
        self.synthesizer
            .synthesize(&mut self.lines_rng, timestamp)
            .text
    }

    fn buffer_line(&mut self, offset: Duration, line: String) {
        let index = self.registry.route(&mut self.routing_rng) as usize;
        let key = self.keys.get(index).or_else(|| self.keys.first());
        if let Some(key) = key {
            self.buffer.push(
                key,
                Entry {
                    timestamp: at(self.epoch, offset).unix_timestamp_nanos(),
                    line,
                },
            );
        }
    }
}
