//! Stream keys.
//!
//! A stream is identified by its tenant plus the sorted union of static
//! labels, current churning values and, when a virtual user emits several
//! streams, the `stream` routing label. Keys with identical contents compare
//! equal regardless of the order labels were configured in.

use std::{collections::BTreeMap, fmt};

use rand::Rng;

use crate::spec::STREAM_LABEL;

/// The canonical identity of a stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamKey {
    tenant: Option<String>,
    labels: Vec<(String, String)>,
}

impl StreamKey {
    /// Build a key from labels in any order. A later duplicate name replaces
    /// an earlier one.
    pub fn new<I, K, V>(tenant: Option<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let labels: BTreeMap<String, String> = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            tenant,
            labels: labels.into_iter().collect(),
        }
    }

    /// The tenant, sent as request metadata and never as a label.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Labels sorted by name.
    #[must_use]
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        write!(f, "}}")?;
        if let Some(tenant) = &self.tenant {
            write!(f, " tenant={tenant:?}")?;
        }
        Ok(())
    }
}

/// Resolves the stream keys of one virtual user.
#[derive(Debug, Clone)]
pub struct Registry {
    tenant: Option<String>,
    labels: BTreeMap<String, String>,
    streams: u32,
}

impl Registry {
    /// Create a new [`Registry`]. A stream count of zero is treated as one.
    #[must_use]
    pub fn new(tenant: Option<String>, labels: BTreeMap<String, String>, streams: u32) -> Self {
        Self {
            tenant,
            labels,
            streams: streams.max(1),
        }
    }

    /// Number of streams lines are spread over.
    #[must_use]
    pub fn streams(&self) -> u32 {
        self.streams
    }

    /// Draw the stream index of the next line. A single stream draws nothing
    /// from `rng`.
    pub fn route<R>(&self, rng: &mut R) -> u32
    where
        R: Rng + ?Sized,
    {
        if self.streams == 1 {
            0
        } else {
            rng.random_range(0..self.streams)
        }
    }

    /// The key of stream `index` given the current churning values.
    #[must_use]
    pub fn resolve(&self, churned: &[(String, u64)], index: u32) -> StreamKey {
        let mut labels = self.labels.clone();
        for (name, value) in churned {
            labels.insert(name.clone(), value.to_string());
        }
        if self.streams > 1 {
            labels.insert(STREAM_LABEL.to_string(), index.to_string());
        }
        StreamKey {
            tenant: self.tenant.clone(),
            labels: labels.into_iter().collect(),
        }
    }

    /// Keys of every stream, indexed by stream index.
    #[must_use]
    pub fn resolve_all(&self, churned: &[(String, u64)]) -> Vec<StreamKey> {
        (0..self.streams)
            .map(|index| self.resolve(churned, index))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use rand::{SeedableRng, rngs::SmallRng};

    use super::{Registry, StreamKey};

    #[test]
    fn key_order_is_canonical() {
        let a = StreamKey::new(Some("0".to_string()), [("zone", "b"), ("app", "x")]);
        let b = StreamKey::new(Some("0".to_string()), [("app", "x"), ("zone", "b")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"{app="x", zone="b"} tenant="0""#);

        let other_tenant = StreamKey::new(Some("1".to_string()), [("app", "x"), ("zone", "b")]);
        assert_ne!(a, other_tenant);
    }

    #[test]
    fn resolve_merges_churned_values() {
        let mut labels = BTreeMap::new();
        labels.insert("ns".to_string(), "a".to_string());
        let registry = Registry::new(Some("0".to_string()), labels, 1);
        let key = registry.resolve(&[("pod".to_string(), 3)], 0);
        assert_eq!(
            key,
            StreamKey::new(Some("0".to_string()), [("ns", "a"), ("pod", "3")])
        );
        assert_eq!(key.tenant(), Some("0"));
    }

    #[test]
    fn stream_label_only_with_several_streams() {
        let mut labels = BTreeMap::new();
        labels.insert("ns".to_string(), "a".to_string());

        let single = Registry::new(None, labels.clone(), 1);
        let mut rng = SmallRng::seed_from_u64(0);
        assert_eq!(single.route(&mut rng), 0);
        assert_eq!(single.resolve(&[], 0).labels().len(), 1);

        let several = Registry::new(None, labels, 4);
        let keys = several.resolve_all(&[]);
        assert_eq!(keys.len(), 4);
        assert_eq!(
            keys[2],
            StreamKey::new(None, [("ns", "a"), ("stream", "2")])
        );
        for _ in 0..100 {
            assert!(several.route(&mut rng) < 4);
        }
    }
}
