//! Batch pushing with retries.
//!
//! ## Metrics
//!
//! `requests_sent`: Push attempts, retries included
//! `request_ok`: Attempts answered with a 2xx status
//! `request_failure`: Attempts that failed with a status or connection error
//! `request_timeout`: Attempts that exceeded `timeout_millis`
//! `request_retry`: Retries scheduled after a transient failure
//! `batches_dropped`: Requests or entries given up on
//!

use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use rand::{Rng, rngs::StdRng};
use tracing::{debug, error, info, warn};

use crate::{
    Session, VuId,
    codec::{self, Batch, Encoded},
    config::{BackoffConfig, Compression},
    transport::Request,
};

/// A push failure, reported to the caller and never retried further.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Transient failures persisted through every attempt
    #[error("Push of {lines} lines failed after {attempts} attempts: {reason}")]
    Exhausted {
        /// Lines in the dropped request
        lines: u64,
        /// Attempts made
        attempts: u16,
        /// The last failure
        reason: String,
    },
    /// The backend or the client refused the request, retrying cannot help
    #[error("Push of {lines} lines rejected (status {status:?}): {reason}")]
    Rejected {
        /// Lines in the dropped request
        lines: u64,
        /// Response status, absent if the request never reached the backend
        status: Option<u16>,
        /// Response body or client error
        reason: String,
    },
    /// A single entry needs a request larger than the ceiling
    #[error("Entry needs a {size} byte request, ceiling is {ceiling} bytes")]
    Oversized {
        /// Size of the smallest request able to carry the entry
        size: usize,
        /// Configured ceiling
        ceiling: usize,
    },
    /// Buffered lines were not flushed within the stop grace period
    #[error("{lines} buffered lines abandoned at stop")]
    Abandoned {
        /// Lines not acknowledged when the grace period ran out
        lines: u64,
    },
}

impl PushError {
    /// Lines lost to this failure.
    #[must_use]
    pub fn lines(&self) -> u64 {
        match self {
            PushError::Exhausted { lines, .. }
            | PushError::Rejected { lines, .. }
            | PushError::Abandoned { lines } => *lines,
            PushError::Oversized { .. } => 1,
        }
    }

    /// True if the failure was caused by the request itself rather than the
    /// backend's availability.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PushError::Rejected { .. } | PushError::Oversized { .. }
        )
    }
}

/// 429 is the backend shedding load, everything else in 4xx is the request's
/// fault.
fn is_transient(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Exponential backoff with jitter.
///
/// The delay before retry `n` (one based) is `min(min_delay * 2^(n-1),
/// max_delay)`, of which the upper half is drawn uniformly.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u16,
}

impl Backoff {
    /// Create a new [`Backoff`].
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Record a failed attempt. Returns the delay before the next attempt, or
    /// `None` once `max_attempts` attempts have been made.
    pub fn next_delay<R>(&mut self, rng: &mut R) -> Option<Duration>
    where
        R: Rng + ?Sized,
    {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        let exponent = u32::from(self.attempts - 1).min(63);
        let base = self
            .config
            .min_delay_millis
            .saturating_mul(1_u64 << exponent)
            .min(self.config.max_delay_millis);
        let spread = base / 2;
        let delay = base - spread + rng.random_range(0..=spread);
        Some(Duration::from_millis(delay))
    }

    /// Failed attempts recorded so far.
    #[must_use]
    pub fn attempts(&self) -> u16 {
        self.attempts
    }
}

/// Pushes the batches of one virtual user.
#[derive(Debug)]
pub struct Pusher {
    vu: VuId,
    jitter: StdRng,
    labels: Vec<(String, String)>,
    acknowledged: u64,
}

impl Pusher {
    /// Create a new [`Pusher`]. Backoff jitter is drawn from `jitter`.
    #[must_use]
    pub fn new(vu: VuId, jitter: StdRng, labels: Vec<(String, String)>) -> Self {
        Self {
            vu,
            jitter,
            labels,
            acknowledged: 0,
        }
    }

    /// Lines acknowledged by the backend over the pusher's lifetime. Updated
    /// as each request succeeds, so a push cut short still counts the
    /// requests that made it.
    #[must_use]
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }

    /// Push `batch`, splitting it into requests no larger than the session
    /// ceiling. Requests are sent in order, each retried on transient
    /// failure. Every line not acknowledged by the backend is accounted for
    /// in the returned failures.
    pub async fn push(&mut self, session: &Session, mut batch: Batch) -> Vec<PushError> {
        let mut failures = Vec::new();
        if batch.is_empty() {
            return failures;
        }
        batch.sort();
        let ceiling = session.ceiling();
        let encoding = match codec::encode(&batch, ceiling) {
            Ok(encoding) => encoding,
            Err(err) => {
                error!(vu = %self.vu, "Dropping batch, encoding failed: {err}");
                counter!("batches_dropped", &self.labels).increment(1);
                failures.push(PushError::Rejected {
                    lines: batch.lines(),
                    status: None,
                    reason: err.to_string(),
                });
                return failures;
            }
        };
        for oversized in encoding.oversized {
            warn!(
                vu = %self.vu,
                size = oversized.size,
                ceiling,
                "Dropping entry larger than the batch ceiling"
            );
            counter!("batches_dropped", &self.labels).increment(1);
            failures.push(PushError::Oversized {
                size: oversized.size,
                ceiling,
            });
        }
        for encoded in encoding.requests {
            if let Err(failure) = self.send(session, encoded).await {
                failures.push(failure);
            }
        }
        failures
    }

    async fn send(&mut self, session: &Session, encoded: Encoded) -> Result<(), PushError> {
        let lines = encoded.lines;
        let tenant = encoded.tenant.clone().unwrap_or_default();
        let gzip = session.config().compression == Compression::Gzip;
        let body = if gzip {
            codec::gzip(&encoded.body).map_err(|err| PushError::Rejected {
                lines,
                status: None,
                reason: err.to_string(),
            })?
        } else {
            encoded.body
        };
        let request = Request {
            tenant: encoded.tenant,
            body: Bytes::from(body),
            gzip,
        };

        let timeout = session.config().timeout();
        let mut backoff = Backoff::new(session.config().backoff);
        loop {
            counter!("requests_sent", &self.labels).increment(1);
            let reason = match tokio::time::timeout(timeout, session.transport().send(&request))
                .await
            {
                Ok(Ok(response)) if (200..300).contains(&response.status) => {
                    counter!("request_ok", &self.labels).increment(1);
                    self.acknowledged += lines;
                    debug!(vu = %self.vu, %tenant, lines, "Pushed");
                    return Ok(());
                }
                Ok(Ok(response)) => {
                    let mut status_labels = self.labels.clone();
                    status_labels.push(("status_code".to_string(), response.status.to_string()));
                    counter!("request_failure", &status_labels).increment(1);
                    if !is_transient(response.status) {
                        error!(
                            vu = %self.vu,
                            %tenant,
                            status = response.status,
                            "Push rejected: {body}",
                            body = response.body
                        );
                        counter!("batches_dropped", &self.labels).increment(1);
                        return Err(PushError::Rejected {
                            lines,
                            status: Some(response.status),
                            reason: response.body,
                        });
                    }
                    format!("status {}: {}", response.status, response.body)
                }
                Ok(Err(err)) => {
                    let mut error_labels = self.labels.clone();
                    error_labels.push(("error".to_string(), err.to_string()));
                    counter!("request_failure", &error_labels).increment(1);
                    if err.is_permanent() {
                        error!(vu = %self.vu, %tenant, "Push request could not be sent: {err}");
                        counter!("batches_dropped", &self.labels).increment(1);
                        return Err(PushError::Rejected {
                            lines,
                            status: None,
                            reason: err.to_string(),
                        });
                    }
                    err.to_string()
                }
                Err(_elapsed) => {
                    counter!("request_timeout", &self.labels).increment(1);
                    format!("timed out after {}ms", timeout.as_millis())
                }
            };

            if let Some(delay) = backoff.next_delay(&mut self.jitter) {
                counter!("request_retry", &self.labels).increment(1);
                info!(
                    vu = %self.vu,
                    %tenant,
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis(),
                    "Retrying push: {reason}"
                );
                tokio::time::sleep(delay).await;
            } else {
                warn!(
                    vu = %self.vu,
                    %tenant,
                    attempts = backoff.attempts(),
                    lines,
                    "Dropping batch, retries exhausted: {reason}"
                );
                counter!("batches_dropped", &self.labels).increment(1);
                return Err(PushError::Exhausted {
                    lines,
                    attempts: backoff.attempts(),
                    reason,
                });
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{io::Read, sync::Arc};

    use flate2::read::GzDecoder;
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::{Backoff, PushError, Pusher};
    use crate::{
        Session, VuId,
        codec::{Batch, Entry},
        config::{BackoffConfig, Compression, SessionConfig},
        stream::StreamKey,
        transport::fake::{Fake, Reply},
    };

    fn session(fake: &Arc<Fake>, configure: impl FnOnce(&mut SessionConfig)) -> Session {
        let mut config = SessionConfig::new("http://localhost:3100", 65);
        config.epoch = Some("2024-05-01T12:00:00Z".to_string());
        configure(&mut config);
        Session::with_transport(config, Arc::clone(fake) as _).expect("valid session")
    }

    fn pusher() -> Pusher {
        Pusher::new(VuId::new(0), StdRng::seed_from_u64(0), Vec::new())
    }

    fn batch(lines: usize) -> Batch {
        let key = StreamKey::new(Some("0".to_string()), [("ns", "a")]);
        let mut batch = Batch::new();
        for i in 0..lines {
            batch.push(
                &key,
                Entry {
                    timestamp: i as i128,
                    line: format!("line {i}"),
                },
            );
        }
        batch
    }

    #[tokio::test(start_paused = true)]
    async fn success_sends_once() {
        let fake = Fake::ok();
        let session = session(&fake, |_| {});
        let failures = pusher().push(&session, batch(10)).await;
        assert!(failures.is_empty());
        assert_eq!(fake.calls(), 1);
        let request = &fake.requests()[0];
        assert_eq!(request.tenant.as_deref(), Some("0"));
        assert!(!request.gzip);
        let body = &fake.bodies()[0];
        assert_eq!(body["streams"][0]["stream"]["ns"], "a");
        assert_eq!(
            body["streams"][0]["values"]
                .as_array()
                .expect("values")
                .len(),
            10
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_sends_nothing() {
        let fake = Fake::ok();
        let session = session(&fake, |_| {});
        assert!(pusher().push(&session, Batch::new()).await.is_empty());
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_bounded() {
        let fake = Fake::always(Reply::Status(503));
        let session = session(&fake, |_| {});
        let failures = pusher().push(&session, batch(3)).await;
        assert_eq!(fake.calls(), 5);
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            PushError::Exhausted {
                lines: 3,
                attempts: 5,
                ..
            }
        ));
        assert!(!failures[0].is_permanent());
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let fake = Fake::always(Reply::Status(400));
        let session = session(&fake, |_| {});
        let failures = pusher().push(&session, batch(3)).await;
        assert_eq!(fake.calls(), 1);
        assert_eq!(
            failures,
            vec![PushError::Rejected {
                lines: 3,
                status: Some(400),
                reason: String::new(),
            }]
        );
        assert!(failures[0].is_permanent());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_and_refusals_are_retried() {
        let fake = Fake::scripted(
            vec![Reply::Status(429), Reply::Refuse, Reply::Status(500)],
            Reply::Status(204),
        );
        let session = session(&fake, |_| {});
        let failures = pusher().push(&session, batch(3)).await;
        assert!(failures.is_empty());
        assert_eq!(fake.calls(), 4);
        // Every attempt carries the same request.
        let requests = fake.requests();
        assert!(requests.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_backend_times_out() {
        let fake = Fake::always(Reply::Hang);
        let session = session(&fake, |config| {
            config.timeout_millis = 100;
            config.backoff = BackoffConfig {
                max_attempts: 3,
                min_delay_millis: 10,
                max_delay_millis: 10,
            };
        });
        let started = tokio::time::Instant::now();
        let failures = pusher().push(&session, batch(1)).await;
        assert_eq!(fake.calls(), 3);
        assert!(matches!(
            &failures[0],
            PushError::Exhausted { attempts: 3, .. }
        ));
        assert!(started.elapsed() >= std::time::Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_entries_are_sorted() {
        let fake = Fake::ok();
        let session = session(&fake, |_| {});
        let key = StreamKey::new(None, [("ns", "a")]);
        let mut batch = Batch::new();
        for ts in [5_i128, 1, 3] {
            batch.push(
                &key,
                Entry {
                    timestamp: ts,
                    line: ts.to_string(),
                },
            );
        }
        assert!(pusher().push(&session, batch).await.is_empty());
        let values = fake.bodies()[0]["streams"][0]["values"].clone();
        let stamps: Vec<&str> = values
            .as_array()
            .expect("values")
            .iter()
            .map(|pair| pair[0].as_str().expect("timestamp"))
            .collect();
        assert_eq!(stamps, vec!["1", "3", "5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn large_batches_are_split() {
        let fake = Fake::ok();
        let session = session(&fake, |config| {
            config.maximum_batch_size = byte_unit::Byte::from_u64(512);
        });
        let failures = pusher().push(&session, batch(100)).await;
        assert!(failures.is_empty());
        assert!(fake.calls() > 1);
        let mut total = 0;
        for request in fake.requests() {
            assert!(request.body.len() <= 512);
            let body: serde_json::Value = serde_json::from_slice(&request.body).expect("json");
            total += body["streams"][0]["values"]
                .as_array()
                .expect("values")
                .len();
        }
        assert_eq!(total, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_entries_are_reported() {
        let fake = Fake::ok();
        let session = session(&fake, |config| {
            config.maximum_batch_size = byte_unit::Byte::from_u64(64);
        });
        let key = StreamKey::new(None, [("ns", "a")]);
        let mut batch = Batch::new();
        batch.push(
            &key,
            Entry {
                timestamp: 0,
                line: "x".repeat(100),
            },
        );
        let failures = pusher().push(&session, batch).await;
        assert_eq!(fake.calls(), 0);
        assert!(matches!(
            failures[..],
            [PushError::Oversized { ceiling: 64, .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn gzip_bodies() {
        let fake = Fake::ok();
        let session = session(&fake, |config| config.compression = Compression::Gzip);
        assert!(pusher().push(&session, batch(5)).await.is_empty());
        let request = &fake.requests()[0];
        assert!(request.gzip);
        let mut decoded = Vec::new();
        GzDecoder::new(&request.body[..])
            .read_to_end(&mut decoded)
            .expect("gzip body");
        let body: serde_json::Value = serde_json::from_slice(&decoded).expect("json");
        assert_eq!(
            body["streams"][0]["values"]
                .as_array()
                .expect("values")
                .len(),
            5
        );
    }

    proptest! {
        #[test]
        fn backoff_is_bounded(seed: u64, max_attempts in 1_u16..20, min in 1_u64..1_000, spread in 0_u64..10_000) {
            let config = BackoffConfig {
                max_attempts,
                min_delay_millis: min,
                max_delay_millis: min + spread,
            };
            let mut rng = StdRng::seed_from_u64(seed);
            let mut backoff = Backoff::new(config);
            let mut delays = 0;
            while let Some(delay) = backoff.next_delay(&mut rng) {
                delays += 1;
                let base = min
                    .saturating_mul(1_u64 << (delays - 1))
                    .min(config.max_delay_millis);
                let millis = u64::try_from(delay.as_millis()).expect("fits");
                prop_assert!(millis <= base);
                prop_assert!(millis >= base - base / 2);
            }
            prop_assert_eq!(delays, u32::from(max_attempts) - 1);
            prop_assert_eq!(backoff.attempts(), max_attempts);
        }
    }
}
