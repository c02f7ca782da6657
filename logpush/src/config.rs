//! Session configuration, parsed from YAML or built in code.
//!
//! Configuration errors are fatal: a [`crate::Session`] refuses to start
//! rather than guess at what the user meant.

use std::time::Duration;

use byte_unit::Byte;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::spec::RawVuSpec;

/// The path every push request is POSTed to, relative to the endpoint.
pub const PUSH_PATH: &str = "/loki/api/v1/push";

/// Errors produced by [`SessionConfig`] and [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// The endpoint is empty
    #[error("Endpoint must not be empty")]
    EmptyEndpoint,
    /// The endpoint does not parse as a URL
    #[error("Endpoint {endpoint:?} is not a valid URL: {reason}")]
    InvalidEndpoint {
        /// The configured endpoint
        endpoint: String,
        /// Why parsing failed
        reason: String,
    },
    /// The endpoint uses a scheme other than http or https
    #[error("Endpoint scheme {0:?} is not supported, use http or https")]
    UnsupportedScheme(String),
    /// The epoch is not an RFC 3339 timestamp
    #[error("Epoch {epoch:?} is not an RFC 3339 timestamp: {source}")]
    Epoch {
        /// The configured epoch
        epoch: String,
        /// Underlying parse error
        #[source]
        source: time::error::Parse,
    },
    /// A value that must be positive was zero
    #[error("{0} must not be zero")]
    Zero(&'static str),
    /// A byte quantity does not fit in memory on this platform
    #[error("{0} is too large")]
    TooLarge(&'static str),
    /// Backoff bounds are inverted
    #[error("Backoff min_delay_millis {min} is larger than max_delay_millis {max}")]
    InvertedBackoff {
        /// Configured minimum delay
        min: u64,
        /// Configured maximum delay
        max: u64,
    },
}

fn default_batch_wait_millis() -> u64 {
    1_000
}

fn default_maximum_batch_size() -> Byte {
    Byte::from_u64(1_048_576)
}

fn default_timeout_millis() -> u64 {
    10_000
}

fn default_stop_grace_millis() -> u64 {
    5_000
}

fn default_max_attempts() -> u16 {
    5
}

fn default_min_delay_millis() -> u64 {
    100
}

fn default_max_delay_millis() -> u64 {
    5_000
}

/// Compression applied to push request bodies
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Bodies are sent as plain JSON
    #[default]
    None,
    /// Bodies are gzipped and sent with `Content-Encoding: gzip`
    Gzip,
}

/// Retry policy for transient push failures
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    /// Total attempts per request, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u16,
    /// Delay before the first retry
    #[serde(default = "default_min_delay_millis")]
    pub min_delay_millis: u64,
    /// Ceiling on any single delay
    #[serde(default = "default_max_delay_millis")]
    pub max_delay_millis: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay_millis: default_min_delay_millis(),
            max_delay_millis: default_max_delay_millis(),
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.max_attempts == 0 {
            return Err(Error::Zero("backoff.max_attempts"));
        }
        if self.min_delay_millis > self.max_delay_millis {
            return Err(Error::InvertedBackoff {
                min: self.min_delay_millis,
                max: self.max_delay_millis,
            });
        }
        Ok(())
    }
}

/// Process wide configuration shared by every virtual user.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Base URL of the log backend. [`PUSH_PATH`] is appended unless already
    /// present. Basic auth credentials embedded in the URL are honored.
    pub endpoint: String,
    /// The seed for every random operation of the session
    pub seed: u64,
    /// When set, virtual users without an explicit tenant use their own id
    /// as tenant
    #[serde(default)]
    pub tenant_from_vu: bool,
    /// When set, every stream carries a `vuid` label holding the virtual
    /// user id, so streams of different virtual users never collapse
    #[serde(default)]
    pub vu_label: bool,
    /// Logical start time of every virtual user, RFC 3339. Defaults to the
    /// wall clock at session creation.
    #[serde(default)]
    pub epoch: Option<String>,
    /// Logical time lines may sit in a virtual user's buffer before a push
    #[serde(default = "default_batch_wait_millis")]
    pub batch_wait_millis: u64,
    /// Ceiling on the uncompressed size of a single push request
    #[serde(default = "default_maximum_batch_size")]
    pub maximum_batch_size: Byte,
    /// Compression of push request bodies
    #[serde(default)]
    pub compression: Compression,
    /// Bound on a single push attempt
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,
    /// Retry policy for transient failures
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Bound on the final flush performed by [`crate::Session::stop`]
    #[serde(default = "default_stop_grace_millis")]
    pub stop_grace_millis: u64,
}

impl SessionConfig {
    /// Create a configuration with every option at its default.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, seed: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            seed,
            tenant_from_vu: false,
            vu_label: false,
            epoch: None,
            batch_wait_millis: default_batch_wait_millis(),
            maximum_batch_size: default_maximum_batch_size(),
            compression: Compression::default(),
            timeout_millis: default_timeout_millis(),
            backoff: BackoffConfig::default(),
            stop_grace_millis: default_stop_grace_millis(),
        }
    }

    /// Resolve the full push URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is empty, does not parse or is not
    /// http(s).
    pub fn push_url(&self) -> Result<Url, Error> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::EmptyEndpoint);
        }
        let mut url = Url::parse(endpoint).map_err(|e| Error::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        }
        if !url.path().ends_with(PUSH_PATH) {
            let path = format!("{}{PUSH_PATH}", url.path().trim_end_matches('/'));
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Resolve the logical epoch, falling back to the current wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured epoch is not RFC 3339.
    pub fn epoch(&self) -> Result<OffsetDateTime, Error> {
        match &self.epoch {
            Some(epoch) => OffsetDateTime::parse(epoch, &Rfc3339)
                .map(|t| t.to_offset(time::UtcOffset::UTC))
                .map_err(|source| Error::Epoch {
                    epoch: epoch.clone(),
                    source,
                }),
            None => Ok(OffsetDateTime::now_utc()),
        }
    }

    /// The batch ceiling in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the ceiling is zero or does not fit in `usize`.
    pub fn ceiling(&self) -> Result<usize, Error> {
        let ceiling = self.maximum_batch_size.as_u128();
        if ceiling == 0 {
            return Err(Error::Zero("maximum_batch_size"));
        }
        usize::try_from(ceiling).map_err(|_| Error::TooLarge("maximum_batch_size"))
    }

    /// Bound on a single push attempt.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    /// Logical time a buffer may age before it is pushed.
    #[must_use]
    pub fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_millis)
    }

    /// Bound on the final flush.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_millis)
    }

    /// Check every option, without resolving the epoch.
    ///
    /// # Errors
    ///
    /// Returns the first invalid option found.
    pub fn validate(&self) -> Result<(), Error> {
        self.push_url()?;
        self.ceiling()?;
        if self.timeout_millis == 0 {
            return Err(Error::Zero("timeout_millis"));
        }
        self.backoff.validate()?;
        if let Some(epoch) = &self.epoch {
            OffsetDateTime::parse(epoch, &Rfc3339).map_err(|source| Error::Epoch {
                epoch: epoch.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// A full run: the session and the virtual user specs the harness assigns.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Session options
    pub session: SessionConfig,
    /// Virtual user specs, assigned in order to VU ids starting at zero
    #[serde(default)]
    pub vus: Vec<RawVuSpec>,
}

impl Config {
    /// Parse a [`Config`] from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or names unknown options.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        Ok(config)
    }
}
