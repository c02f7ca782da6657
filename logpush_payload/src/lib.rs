//! The logpush payloads
//!
//! This library renders single log lines for the logpush project. Every
//! format is a pure function of a timestamp and a caller supplied RNG, so a
//! seeded RNG reproduces the exact same sequence of lines.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::cargo_common_metadata)]

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use apache::{ApacheCombined, ApacheCommon, ApacheError};
pub use json::Json;
pub use logfmt::Logfmt;
pub use size::{SizePolicy, truncate};
pub use syslog::{Syslog3164, Syslog5424};

pub mod apache;
mod common;
pub mod json;
pub mod logfmt;
pub mod size;
pub mod syslog;

/// Errors related to line synthesis configuration
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A line size of zero bytes was requested
    #[error("Line size must not be zero")]
    ZeroSize,
    /// The minimum line size is larger than the maximum
    #[error("Minimum line size {min} is larger than maximum line size {max}")]
    InvertedRange {
        /// Configured minimum
        min: usize,
        /// Configured maximum
        max: usize,
    },
}

/// Render one line of a given format.
pub trait Render {
    /// Render a single line stamped with `timestamp`. Implementations draw
    /// every random field from `rng` and produce ASCII without a trailing
    /// newline.
    fn render<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> String
    where
        R: Rng + ?Sized;
}

/// The log format a virtual user emits.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Format {
    /// Structured `key=value` pairs
    #[default]
    Logfmt,
    /// A JSON object
    Json,
    /// Apache Common Log Format
    ApacheCommon,
    /// Apache Combined Log Format
    ApacheCombined,
    /// Apache error log
    ApacheError,
    /// BSD syslog
    Rfc3164,
    /// IETF syslog
    Rfc5424,
}

impl Render for Format {
    fn render<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> String
    where
        R: Rng + ?Sized,
    {
        match self {
            Format::Logfmt => Logfmt.render(rng, timestamp),
            Format::Json => Json.render(rng, timestamp),
            Format::ApacheCommon => ApacheCommon.render(rng, timestamp),
            Format::ApacheCombined => ApacheCombined.render(rng, timestamp),
            Format::ApacheError => ApacheError.render(rng, timestamp),
            Format::Rfc3164 => Syslog3164.render(rng, timestamp),
            Format::Rfc5424 => Syslog5424.render(rng, timestamp),
        }
    }
}

/// A synthesized line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// The rendered text
    pub text: String,
}

impl Line {
    /// Byte length of the rendered text.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// True if the line holds no text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Combines a [`Format`] with a [`SizePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Synthesizer {
    format: Format,
    size: SizePolicy,
}

impl Synthesizer {
    /// Create a new [`Synthesizer`].
    ///
    /// # Errors
    ///
    /// Returns an error if `size` cannot be satisfied, see
    /// [`SizePolicy::validate`].
    pub fn new(format: Format, size: SizePolicy) -> Result<Self, Error> {
        size.validate()?;
        Ok(Self { format, size })
    }

    /// The configured format.
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// The configured size policy.
    #[must_use]
    pub fn size_policy(&self) -> SizePolicy {
        self.size
    }

    /// Render one line and bring it within the size policy.
    pub fn synthesize<R>(&self, rng: &mut R, timestamp: OffsetDateTime) -> Line
    where
        R: Rng + ?Sized,
    {
        let mut text = self.format.render(rng, timestamp);
        self.size.apply(rng, &mut text);
        Line { text }
    }
}
