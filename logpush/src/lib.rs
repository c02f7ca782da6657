//! Synthetic log traffic for load testing a log ingestion backend.
//!
//! A [`Session`] holds the configuration and network client of a run. Each
//! virtual user is handed a [`VuSpec`] through [`Session::assign_spec`] and
//! then ticked by the harness. On every tick the virtual user works out how
//! many lines its rate allows, synthesizes them, advances its churning labels
//! and pushes buffered lines to the backend in size bounded batches. Output
//! is deterministic for a given seed and epoch.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
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

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod churn;
pub mod codec;
pub mod config;
pub mod push;
pub mod rng;
pub mod session;
pub mod spec;
pub mod stream;
pub mod transport;
pub mod vu;

pub use config::{Config, SessionConfig};
pub use push::PushError;
pub use session::{Session, StopReport};
pub use spec::{ChurnLabel, RawVuSpec, VuSpec};
pub use stream::StreamKey;
pub use vu::{TickResult, VirtualUser};

/// Identifier of a virtual user, assigned by the harness.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct VuId(u64);

impl VuId {
    /// Create a new [`VuId`].
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for VuId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for VuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors returned while creating a session or assigning a spec.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid session configuration
    #[error(transparent)]
    Config(#[from] config::Error),
    /// Invalid virtual user spec
    #[error(transparent)]
    Spec(#[from] spec::Error),
    /// The network client could not be built
    #[error(transparent)]
    Transport(#[from] transport::Error),
}
