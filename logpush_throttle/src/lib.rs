//! The logpush rate scheduler
//!
//! This library converts the time elapsed between two ticks of a virtual user
//! into an exact, integral number of log lines or bytes that user owes its
//! target. Fractional entitlement is carried forward from tick to tick so that
//! the released total never drifts from `rate * elapsed` by more than one unit,
//! no matter how jittery the tick cadence is.
//!
//! Nothing in here sleeps. Callers own the pacing of ticks and inject time
//! either directly, as a [`Duration`], or through a [`Clock`].

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
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::cargo_common_metadata)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use byte_unit::Byte;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

mod credit;

pub use credit::Credit;

/// Errors produced when building a [`Scheduler`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// Per-second rates must be finite and strictly positive.
    #[error("Rate must be a finite number greater than zero, got {0}")]
    InvalidRate(f64),
    /// Byte value does not fit the scheduler's counters.
    #[error("Rate value {0} exceeds maximum supported value")]
    ValueTooLarge(Byte),
    /// Value is zero
    #[error("Rate value must not be zero")]
    Zero,
}

/// The rate target of a single virtual user.
///
/// Exactly one dimension is ever active. Per-second variants accrue credit
/// with elapsed time, per-tick variants are a constant burst that ignores
/// elapsed time entirely.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Config {
    /// Emit this many lines per second of elapsed time.
    LinesPerSecond(f64),
    /// Emit this many bytes per second of elapsed time (e.g., "1MB", "512KiB").
    BytesPerSecond(Byte),
    /// Emit exactly this many lines on every tick.
    LinesPerTick(u32),
    /// Emit exactly this many bytes on every tick.
    BytesPerTick(Byte),
}

/// The dimension a [`Scheduler`] counts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Whole log lines
    Lines,
    /// Bytes of rendered log line text
    Bytes,
}

/// The amount a virtual user must emit on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    /// Emit this many lines.
    Lines(u64),
    /// Emit lines until exactly this many bytes have been produced.
    Bytes(u64),
}

impl Quota {
    /// The integral amount owed, whatever its unit.
    #[must_use]
    pub fn amount(self) -> u64 {
        match self {
            Quota::Lines(n) | Quota::Bytes(n) => n,
        }
    }

    /// True if nothing is owed this tick.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.amount() == 0
    }
}

/// Per virtual user rate scheduler.
///
/// A scheduler is never shared between virtual users. It holds no locks and
/// expects its owner to call [`Scheduler::quota`] sequentially.
#[derive(Debug, Clone, Copy)]
pub enum Scheduler {
    /// Credit accrues with elapsed time at a steady rate.
    Rate {
        /// Dimension the credit is counted in
        unit: Unit,
        /// Accumulated, fractional entitlement
        credit: Credit,
    },
    /// A constant amount per tick.
    Fixed {
        /// Dimension the burst is counted in
        unit: Unit,
        /// Amount released per tick
        amount: u64,
    },
}

fn bytes_to_u64(bytes: Byte) -> Result<u64, Error> {
    let value = bytes.as_u128();
    if value == 0 {
        return Err(Error::Zero);
    }
    u64::try_from(value).map_err(|_| Error::ValueTooLarge(bytes))
}

impl Scheduler {
    /// Create a new [`Scheduler`] from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a per-second rate is not finite and positive, or if
    /// any configured amount is zero or too large.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(config: Config) -> Result<Self, Error> {
        match config {
            Config::LinesPerSecond(rate) => {
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(Error::InvalidRate(rate));
                }
                Ok(Scheduler::Rate {
                    unit: Unit::Lines,
                    credit: Credit::new(rate),
                })
            }
            Config::BytesPerSecond(bytes) => Ok(Scheduler::Rate {
                unit: Unit::Bytes,
                credit: Credit::new(bytes_to_u64(bytes)? as f64),
            }),
            Config::LinesPerTick(lines) => {
                if lines == 0 {
                    return Err(Error::Zero);
                }
                Ok(Scheduler::Fixed {
                    unit: Unit::Lines,
                    amount: u64::from(lines),
                })
            }
            Config::BytesPerTick(bytes) => Ok(Scheduler::Fixed {
                unit: Unit::Bytes,
                amount: bytes_to_u64(bytes)?,
            }),
        }
    }

    /// The dimension this scheduler counts in.
    #[must_use]
    pub fn unit(&self) -> Unit {
        match self {
            Scheduler::Rate { unit, .. } | Scheduler::Fixed { unit, .. } => *unit,
        }
    }

    /// Return the amount owed for `elapsed` time since the previous call.
    ///
    /// Fixed schedulers return their burst regardless of `elapsed`.
    pub fn quota(&mut self, elapsed: Duration) -> Quota {
        let (unit, amount) = match self {
            Scheduler::Rate { unit, credit } => (*unit, credit.accrue(elapsed.as_secs_f64())),
            Scheduler::Fixed { unit, amount } => (*unit, *amount),
        };
        match unit {
            Unit::Lines => Quota::Lines(amount),
            Unit::Bytes => Quota::Bytes(amount),
        }
    }
}

/// The `Clock` virtual users sample once per tick.
pub trait Clock: std::fmt::Debug {
    /// The number of ticks, in microseconds, elapsed since the clock was
    /// created.
    fn ticks_elapsed(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for RealClock {
    /// Return the number of ticks since `Clock` was created, saturating at
    /// `u64::MAX`.
    fn ticks_elapsed(&self) -> u64 {
        let ticks_since: u128 = Instant::now().duration_since(self.start).as_micros();
        u64::try_from(ticks_since).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a harness may hold one copy and
/// advance it while a virtual user samples another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ticks: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a new [`ManualClock`] at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let micros = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.ticks.fetch_add(micros, Ordering::Relaxed);
    }

    /// Set the clock to an absolute tick value. Setting it backward is
    /// permitted and is observed by callers as zero elapsed time.
    pub fn set(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn ticks_elapsed(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}
