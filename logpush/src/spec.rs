//! Virtual user specs.
//!
//! A [`VuSpec`] is the validated, tagged description of what one virtual user
//! emits. [`RawVuSpec`] is the flat shape users write, every option optional,
//! and is converted with [`TryFrom`] so that conflicting or missing options
//! are rejected instead of one silently winning.

use std::collections::BTreeMap;

use byte_unit::Byte;
use logpush_payload::{Format, SizePolicy};
use logpush_throttle::Config as RateConfig;
use serde::{Deserialize, Serialize};

/// The label added to every line when a virtual user emits more than one
/// stream.
pub const STREAM_LABEL: &str = "stream";

/// The label carrying the virtual user id when the session sets `vu_label`.
pub const VU_LABEL: &str = "vuid";

/// Errors produced when validating a [`VuSpec`]
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The rate target is invalid
    #[error("Rate configuration error: {0}")]
    Rate(#[from] logpush_throttle::Error),
    /// The line size policy is invalid
    #[error("Line size configuration error: {0}")]
    Size(#[from] logpush_payload::Error),
    /// More than one rate target was given
    #[error("Exactly one of lines_per_second, bytes_per_second, lines_per_tick or bytes_per_tick may be set")]
    ConflictingRate,
    /// No rate target was given
    #[error("One of lines_per_second, bytes_per_second, lines_per_tick or bytes_per_tick must be set")]
    NoRate,
    /// Both a fixed maximum and a random range were given
    #[error("max_line_size conflicts with random_line_size_min and random_line_size_max")]
    ConflictingSize,
    /// Only one end of the random size range was given
    #[error("random_line_size_min and random_line_size_max must be set together")]
    IncompleteSizeRange,
    /// A label name is not a valid label identifier
    #[error("Label name {0:?} must match [a-zA-Z_][a-zA-Z0-9_]*")]
    InvalidLabelName(String),
    /// A label name is both static and churning
    #[error("Label {0:?} is both static and churning")]
    DuplicateLabel(String),
    /// A label uses a name the virtual user sets itself
    #[error("Label {0:?} is reserved")]
    ReservedLabel(&'static str),
    /// A churning label would never change
    #[error("Churning label {0:?} must have a cadence larger than zero")]
    ZeroCadence(String),
    /// The stream count is zero
    #[error("streams must be at least one")]
    ZeroStreams,
    /// The spec would produce streams with no labels at all
    #[error("At least one static or churning label is required")]
    NoLabels,
    /// An explicit tenant is empty or not printable ASCII
    #[error("Tenant {0:?} must be non-empty printable ASCII")]
    InvalidTenant(String),
}

fn default_cadence() -> u64 {
    100
}

fn default_streams() -> u32 {
    1
}

/// A label whose value increments periodically.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChurnLabel {
    /// Ticks between increments
    #[serde(default = "default_cadence")]
    pub cadence: u64,
    /// Value at the first tick
    #[serde(default)]
    pub initial: u64,
}

impl Default for ChurnLabel {
    fn default() -> Self {
        Self {
            cadence: default_cadence(),
            initial: 0,
        }
    }
}

impl ChurnLabel {
    /// A label starting at zero that increments every `cadence` ticks.
    #[must_use]
    pub fn every(cadence: u64) -> Self {
        Self {
            cadence,
            initial: 0,
        }
    }
}

/// The validated description of a single virtual user.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VuSpec {
    /// Labels fixed for the lifetime of the virtual user
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Labels whose value increments on a cadence
    #[serde(default)]
    pub churning_labels: BTreeMap<String, ChurnLabel>,
    /// The format of every line
    #[serde(default)]
    pub format: Format,
    /// Explicit tenant, takes precedence over a tenant derived from the VU id
    #[serde(default)]
    pub tenant: Option<String>,
    /// The rate target
    pub rate: RateConfig,
    /// The line size policy
    #[serde(default)]
    pub size: SizePolicy,
    /// Number of label-distinct streams the virtual user spreads lines over
    #[serde(default = "default_streams")]
    pub streams: u32,
}

impl VuSpec {
    /// A spec with the given rate and every other option at its default.
    #[must_use]
    pub fn new(rate: RateConfig) -> Self {
        Self {
            labels: BTreeMap::new(),
            churning_labels: BTreeMap::new(),
            format: Format::default(),
            tenant: None,
            rate,
            size: SizePolicy::default(),
            streams: default_streams(),
        }
    }

    /// Add a static label.
    #[must_use]
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Add a churning label.
    #[must_use]
    pub fn churning_label(mut self, name: impl Into<String>, churn: ChurnLabel) -> Self {
        self.churning_labels.insert(name.into(), churn);
        self
    }

    /// Check every option.
    ///
    /// Rate and size are validated again when the scheduler and synthesizer
    /// are built, this checks them early so a bad spec fails as a whole.
    ///
    /// # Errors
    ///
    /// Returns the first invalid option found.
    pub fn validate(&self) -> Result<(), Error> {
        logpush_throttle::Scheduler::new(self.rate)?;
        self.size.validate()?;
        if self.streams == 0 {
            return Err(Error::ZeroStreams);
        }
        if let Some(tenant) = self
            .tenant
            .as_ref()
            .filter(|t| t.is_empty() || !t.chars().all(|c| c.is_ascii_graphic()))
        {
            return Err(Error::InvalidTenant(tenant.clone()));
        }
        for name in self.labels.keys().chain(self.churning_labels.keys()) {
            if !is_label_name(name) {
                return Err(Error::InvalidLabelName(name.clone()));
            }
            if self.streams > 1 && name == STREAM_LABEL {
                return Err(Error::ReservedLabel(STREAM_LABEL));
            }
        }
        for (name, churn) in &self.churning_labels {
            if self.labels.contains_key(name) {
                return Err(Error::DuplicateLabel(name.clone()));
            }
            if churn.cadence == 0 {
                return Err(Error::ZeroCadence(name.clone()));
            }
        }
        if self.streams == 1 && self.labels.is_empty() && self.churning_labels.is_empty() {
            return Err(Error::NoLabels);
        }
        Ok(())
    }
}

fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The flat spec shape, every option optional.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RawVuSpec {
    /// Labels fixed for the lifetime of the virtual user
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Labels whose value increments on a cadence
    #[serde(default)]
    pub churning_labels: BTreeMap<String, ChurnLabel>,
    /// The format of every line
    #[serde(default)]
    pub format: Format,
    /// Explicit tenant
    #[serde(default)]
    pub tenant: Option<String>,
    /// Lines per second
    #[serde(default)]
    pub lines_per_second: Option<f64>,
    /// Bytes per second
    #[serde(default)]
    pub bytes_per_second: Option<Byte>,
    /// Lines per tick, regardless of elapsed time
    #[serde(default)]
    pub lines_per_tick: Option<u32>,
    /// Bytes per tick, regardless of elapsed time
    #[serde(default)]
    pub bytes_per_tick: Option<Byte>,
    /// Every line is clipped to at most this many bytes
    #[serde(default)]
    pub max_line_size: Option<usize>,
    /// Lower bound of the random line size
    #[serde(default)]
    pub random_line_size_min: Option<usize>,
    /// Upper bound of the random line size
    #[serde(default)]
    pub random_line_size_max: Option<usize>,
    /// Number of streams, defaults to one
    #[serde(default)]
    pub streams: Option<u32>,
}

impl TryFrom<RawVuSpec> for VuSpec {
    type Error = Error;

    fn try_from(raw: RawVuSpec) -> Result<Self, Self::Error> {
        let rate = match (
            raw.lines_per_second,
            raw.bytes_per_second,
            raw.lines_per_tick,
            raw.bytes_per_tick,
        ) {
            (Some(rate), None, None, None) => RateConfig::LinesPerSecond(rate),
            (None, Some(rate), None, None) => RateConfig::BytesPerSecond(rate),
            (None, None, Some(amount), None) => RateConfig::LinesPerTick(amount),
            (None, None, None, Some(amount)) => RateConfig::BytesPerTick(amount),
            (None, None, None, None) => return Err(Error::NoRate),
            _ => return Err(Error::ConflictingRate),
        };
        let size = match (
            raw.max_line_size,
            raw.random_line_size_min,
            raw.random_line_size_max,
        ) {
            (None, None, None) => SizePolicy::Unbounded,
            (Some(max), None, None) => SizePolicy::Max { max },
            (None, Some(min), Some(max)) => SizePolicy::Range { min, max },
            (None, _, _) => return Err(Error::IncompleteSizeRange),
            (Some(_), _, _) => return Err(Error::ConflictingSize),
        };
        let spec = VuSpec {
            labels: raw.labels,
            churning_labels: raw.churning_labels,
            format: raw.format,
            tenant: raw.tenant,
            rate,
            size,
            streams: raw.streams.unwrap_or_else(default_streams),
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod test {
    use logpush_payload::{Format, SizePolicy};
    use logpush_throttle::Config as RateConfig;

    use super::{ChurnLabel, Error, RawVuSpec, VuSpec};

    fn raw() -> RawVuSpec {
        let mut raw = RawVuSpec::default();
        raw.labels.insert("ns".to_string(), "a".to_string());
        raw
    }

    #[test]
    fn flat_spec_converts() {
        let raw: RawVuSpec = serde_yaml::from_str(
            r#"
labels:
  ns: a
churning_labels:
  pod:
    cadence: 10
format: apache_combined
lines_per_second: 50.0
random_line_size_min: 100
random_line_size_max: 200
streams: 4
"#,
        )
        .expect("valid yaml");
        let spec = VuSpec::try_from(raw).expect("valid spec");
        assert_eq!(spec.rate, RateConfig::LinesPerSecond(50.0));
        assert_eq!(spec.size, SizePolicy::Range { min: 100, max: 200 });
        assert_eq!(spec.format, Format::ApacheCombined);
        assert_eq!(spec.streams, 4);
        assert_eq!(
            spec.churning_labels["pod"],
            ChurnLabel {
                cadence: 10,
                initial: 0
            }
        );
    }

    #[test]
    fn rate_must_be_exactly_one() {
        assert_eq!(VuSpec::try_from(raw()), Err(Error::NoRate));

        let mut both = raw();
        both.lines_per_second = Some(10.0);
        both.lines_per_tick = Some(10);
        assert_eq!(VuSpec::try_from(both), Err(Error::ConflictingRate));

        let mut negative = raw();
        negative.lines_per_second = Some(-1.0);
        assert!(matches!(VuSpec::try_from(negative), Err(Error::Rate(_))));
    }

    #[test]
    fn size_policy_shapes() {
        let mut conflicting = raw();
        conflicting.lines_per_tick = Some(1);
        conflicting.max_line_size = Some(10);
        conflicting.random_line_size_max = Some(10);
        assert_eq!(VuSpec::try_from(conflicting), Err(Error::ConflictingSize));

        let mut half = raw();
        half.lines_per_tick = Some(1);
        half.random_line_size_min = Some(10);
        assert_eq!(VuSpec::try_from(half), Err(Error::IncompleteSizeRange));

        let mut inverted = raw();
        inverted.lines_per_tick = Some(1);
        inverted.random_line_size_min = Some(20);
        inverted.random_line_size_max = Some(10);
        assert!(matches!(VuSpec::try_from(inverted), Err(Error::Size(_))));
    }

    #[test]
    fn label_rules() {
        let base = VuSpec::new(RateConfig::LinesPerTick(1));
        assert_eq!(base.clone().validate(), Err(Error::NoLabels));
        assert_eq!(
            base.clone().label("9lives", "x").validate(),
            Err(Error::InvalidLabelName("9lives".to_string()))
        );
        assert_eq!(
            base.clone().label("app-name", "x").validate(),
            Err(Error::InvalidLabelName("app-name".to_string()))
        );
        assert_eq!(
            base.clone()
                .label("pod", "x")
                .churning_label("pod", ChurnLabel::default())
                .validate(),
            Err(Error::DuplicateLabel("pod".to_string()))
        );
        assert_eq!(
            base.clone()
                .label("ns", "a")
                .churning_label("pod", ChurnLabel::every(0))
                .validate(),
            Err(Error::ZeroCadence("pod".to_string()))
        );

        let mut streams = base.clone().label("stream", "x");
        assert!(streams.validate().is_ok());
        streams.streams = 2;
        assert_eq!(streams.validate(), Err(Error::ReservedLabel("stream")));
        streams.streams = 0;
        assert_eq!(streams.validate(), Err(Error::ZeroStreams));

        // Several streams carry the routing label, so no other label is needed.
        let mut bare = base.clone();
        bare.streams = 3;
        assert!(bare.validate().is_ok());

        let mut tenant = base.label("_ns", "a");
        tenant.tenant = Some(String::new());
        assert_eq!(tenant.validate(), Err(Error::InvalidTenant(String::new())));
        tenant.tenant = Some("team a".to_string());
        assert_eq!(
            tenant.validate(),
            Err(Error::InvalidTenant("team a".to_string()))
        );
        tenant.tenant = Some("team-a".to_string());
        assert!(tenant.validate().is_ok());
    }
}
