//! Churning label values.
//!
//! Each churning label owns an independent counter. At tick `t` (zero based)
//! a label with initial value `v0` and cadence `n` holds `v0 + floor(t / n)`.
//! Values never decrease and never reset during a run.

use std::collections::BTreeMap;

use crate::spec::ChurnLabel;

#[derive(Debug, Clone, Copy)]
struct Cadence {
    every: u64,
    since: u64,
}

/// Churning label state of one virtual user.
#[derive(Debug, Clone)]
pub struct Engine {
    values: Vec<(String, u64)>,
    cadences: Vec<Cadence>,
    ticks: u64,
}

impl Engine {
    /// Create a new [`Engine`]. Cadences of zero are treated as one, specs
    /// reject them before an engine is built.
    #[must_use]
    pub fn new(labels: &BTreeMap<String, ChurnLabel>) -> Self {
        let mut values = Vec::with_capacity(labels.len());
        let mut cadences = Vec::with_capacity(labels.len());
        for (name, churn) in labels {
            values.push((name.clone(), churn.initial));
            cadences.push(Cadence {
                every: churn.cadence.max(1),
                since: 0,
            });
        }
        Self {
            values,
            cadences,
            ticks: 0,
        }
    }

    /// Advance to the next tick and return the label values for it. The first
    /// call returns the values for tick zero.
    pub fn churn(&mut self) -> &[(String, u64)] {
        if self.ticks > 0 {
            for ((_, value), cadence) in self.values.iter_mut().zip(self.cadences.iter_mut()) {
                cadence.since += 1;
                if cadence.since == cadence.every {
                    *value = value.saturating_add(1);
                    cadence.since = 0;
                }
            }
        }
        self.ticks += 1;
        &self.values
    }

    /// The values returned by the most recent [`Engine::churn`].
    #[must_use]
    pub fn current(&self) -> &[(String, u64)] {
        &self.values
    }

    /// Number of ticks churned so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
