//! The session: configuration and network client shared by every virtual
//! user of a run.

use std::sync::Arc;

use futures::future::join_all;
use logpush_throttle::{Clock, RealClock};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    Error, VuId,
    config::SessionConfig,
    push::PushError,
    rng,
    spec::VuSpec,
    transport::{HttpTransport, Transport},
    vu::VirtualUser,
};

/// Process wide state of a run. Immutable once created; virtual users borrow
/// it for every tick.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    pool: rng::Pool,
    epoch: OffsetDateTime,
    ceiling: usize,
    transport: Arc<dyn Transport>,
}

/// Outcome of [`Session::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Lines acknowledged by the backend during the final flush
    pub lines_flushed: u64,
    /// Every failure of the final flush, with the virtual user it belongs to
    pub failures: Vec<(VuId, PushError)>,
}

impl StopReport {
    /// True if every buffered line reached the backend.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Session {
    /// Create a new [`Session`] pushing over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: SessionConfig) -> Result<Self, Error> {
        config.validate()?;
        let transport = HttpTransport::new(config.push_url()?)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a new [`Session`] pushing through `transport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_transport(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let epoch = config.epoch()?;
        let ceiling = config.ceiling()?;
        info!(
            endpoint = %config.endpoint,
            seed = config.seed,
            tenant_from_vu = config.tenant_from_vu,
            "Session created"
        );
        Ok(Self {
            pool: rng::Pool::new(config.seed),
            config,
            epoch,
            ceiling,
            transport,
        })
    }

    /// Assign `spec` to virtual user `vu`, measuring tick intervals on the
    /// wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error if `spec` is invalid.
    pub fn assign_spec(&self, vu: VuId, spec: VuSpec) -> Result<VirtualUser, Error> {
        self.assign_spec_with_clock(vu, spec, RealClock::default())
    }

    /// Assign `spec` to virtual user `vu`, measuring tick intervals on
    /// `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if `spec` is invalid.
    pub fn assign_spec_with_clock<C>(
        &self,
        vu: VuId,
        spec: VuSpec,
        clock: C,
    ) -> Result<VirtualUser, Error>
    where
        C: Clock + Send + Sync + 'static,
    {
        Ok(VirtualUser::new(self, vu, spec, Box::new(clock))?)
    }

    /// The tenant of virtual user `vu`. An explicit tenant wins, otherwise
    /// the VU id is used if the session derives tenants from VUs.
    #[must_use]
    pub fn tenant_for(&self, vu: VuId, explicit: Option<String>) -> Option<String> {
        explicit.or_else(|| self.config.tenant_from_vu.then(|| vu.to_string()))
    }

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Logical start time of every virtual user.
    #[must_use]
    pub fn epoch(&self) -> OffsetDateTime {
        self.epoch
    }

    /// The random stream pool.
    #[must_use]
    pub fn pool(&self) -> &rng::Pool {
        &self.pool
    }

    /// Ceiling on the uncompressed size of a push request.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Flush every virtual user concurrently and release the network client.
    ///
    /// Flushes share a single deadline of `stop_grace_millis`. A virtual user
    /// still flushing at the deadline is abandoned and reported with the
    /// number of lines the backend had not acknowledged by then.
    pub async fn stop(self, vus: Vec<VirtualUser>) -> StopReport {
        let deadline = tokio::time::Instant::now() + self.config.stop_grace();
        let session = &self;
        let flushes = vus.into_iter().map(|mut vu| async move {
            let id = vu.id();
            let pending = vu.buffered_lines();
            let acknowledged = vu.acknowledged_lines();
            let flushed = tokio::time::timeout_at(deadline, vu.flush(session)).await;
            let failures = match flushed {
                Ok(failures) => failures,
                Err(_elapsed) => {
                    let lines =
                        pending.saturating_sub(vu.acknowledged_lines() - acknowledged);
                    warn!(vu = %id, lines, "Abandoning flush at stop deadline");
                    vec![PushError::Abandoned { lines }]
                }
            };
            (id, pending, failures)
        });

        let mut report = StopReport::default();
        for (id, pending, failures) in join_all(flushes).await {
            let lost: u64 = failures.iter().map(PushError::lines).sum();
            report.lines_flushed += pending.saturating_sub(lost);
            report
                .failures
                .extend(failures.into_iter().map(|failure| (id, failure)));
        }
        info!(
            lines_flushed = report.lines_flushed,
            failures = report.failures.len(),
            "Session stopped"
        );
        report
    }
}
