//! Line size policy.
//!
//! A rendered line is brought to its configured size by clipping or padding.
//! Size violations are never errors: lines are clamped silently.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::Error;

const PADDING: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// How the byte length of every synthesized line is bounded.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum SizePolicy {
    /// Lines are left exactly as rendered.
    #[default]
    Unbounded,
    /// Lines longer than `max` bytes are clipped to `max` bytes.
    Max {
        /// The largest permitted line, in bytes
        max: usize,
    },
    /// Every line is clipped or padded to a length drawn uniformly from
    /// `[min, max]`.
    Range {
        /// The smallest permitted line, in bytes
        min: usize,
        /// The largest permitted line, in bytes
        max: usize,
    },
}

impl SizePolicy {
    /// Check the policy is satisfiable.
    ///
    /// # Errors
    ///
    /// Returns an error if any size is zero or `min` exceeds `max`.
    pub fn validate(&self) -> Result<(), Error> {
        match *self {
            SizePolicy::Max { max: 0 } | SizePolicy::Range { min: 0, .. } => Err(Error::ZeroSize),
            SizePolicy::Range { min, max } if min > max => Err(Error::InvertedRange { min, max }),
            SizePolicy::Unbounded | SizePolicy::Max { .. } | SizePolicy::Range { .. } => Ok(()),
        }
    }

    /// The largest line this policy admits, if any.
    #[must_use]
    pub fn maximum(&self) -> Option<usize> {
        match *self {
            SizePolicy::Unbounded => None,
            SizePolicy::Max { max } | SizePolicy::Range { max, .. } => Some(max),
        }
    }

    /// Bring `line` into compliance with this policy.
    ///
    /// Range policies draw the target length from `rng` once per line, whether
    /// or not the line ends up clipped.
    pub fn apply<R>(&self, rng: &mut R, line: &mut String)
    where
        R: Rng + ?Sized,
    {
        match *self {
            SizePolicy::Unbounded => {}
            SizePolicy::Max { max } => truncate(line, max),
            SizePolicy::Range { min, max } => {
                let target = rng.random_range(min..=max);
                if line.len() > target {
                    truncate(line, target);
                } else {
                    pad(rng, line, target);
                }
            }
        }
    }
}

/// Clip `line` to at most `max` bytes without splitting a character.
pub fn truncate(line: &mut String, max: usize) {
    if line.len() <= max {
        return;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line.truncate(end);
}

/// Pad `line` with a space and random alphanumerics up to exactly `target`
/// bytes.
fn pad<R>(rng: &mut R, line: &mut String, target: usize)
where
    R: Rng + ?Sized,
{
    if line.len() >= target {
        return;
    }
    line.reserve(target - line.len());
    if !line.is_empty() && target - line.len() > 1 {
        line.push(' ');
    }
    while line.len() < target {
        let idx = rng.random_range(0..PADDING.len());
        line.push(char::from(PADDING[idx]));
    }
}
