//! Push request encoding.
//!
//! A [`Batch`] is serialized into one or more Loki JSON push bodies:
//!
//! ```text
//! {"streams":[{"stream":{"ns":"a"},"values":[["1714564800000000000","line"],...]},...]}
//! ```
//!
//! Bodies are built incrementally so that no body exceeds the configured
//! ceiling. Streams and entries keep their order across bodies; a request
//! carries streams of exactly one tenant.

use std::{collections::BTreeMap, io::Write};

use flate2::{Compression, write::GzEncoder};

use crate::stream::StreamKey;

const OPEN: &[u8] = b"{\"streams\":[";
const CLOSE: &[u8] = b"]}";

/// Errors produced while encoding a push request
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Serialization failed
    #[error("Failed to serialize push request: {0}")]
    Json(#[from] serde_json::Error),
    /// Compression failed
    #[error("Failed to compress push request: {0}")]
    Io(#[from] std::io::Error),
}

/// A single log line with its timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Nanoseconds since the Unix epoch
    pub timestamp: i128,
    /// The line
    pub line: String,
}

/// Lines of one virtual user, grouped by stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    streams: BTreeMap<StreamKey, Vec<Entry>>,
    lines: u64,
    bytes: u64,
}

impl Batch {
    /// Create an empty [`Batch`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` to the stream `key`.
    pub fn push(&mut self, key: &StreamKey, entry: Entry) {
        self.lines += 1;
        self.bytes += entry.line.len() as u64;
        if let Some(entries) = self.streams.get_mut(key) {
            entries.push(entry);
        } else {
            self.streams.insert(key.clone(), vec![entry]);
        }
    }

    /// Total lines held.
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Total line bytes held, framing excluded.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// True if the batch holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    /// Entries of `key`, in order.
    #[must_use]
    pub fn entries(&self, key: &StreamKey) -> Option<&[Entry]> {
        self.streams.get(key).map(Vec::as_slice)
    }

    /// Stable sort every stream by timestamp.
    pub fn sort(&mut self) {
        for entries in self.streams.values_mut() {
            entries.sort_by_key(|entry| entry.timestamp);
        }
    }

    /// Iterate streams in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&StreamKey, &[Entry])> {
        self.streams
            .iter()
            .map(|(key, entries)| (key, entries.as_slice()))
    }
}

/// One serialized push request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Tenant of every stream in the body
    pub tenant: Option<String>,
    /// Uncompressed JSON
    pub body: Vec<u8>,
    /// Lines in the body
    pub lines: u64,
    /// Line bytes in the body, framing excluded
    pub bytes: u64,
}

/// An entry that cannot fit in a request on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Oversized {
    /// Size of the smallest request that could carry the entry
    pub size: usize,
}

/// Result of encoding a batch.
#[derive(Debug, Default)]
pub struct Encoding {
    /// Request bodies, in send order
    pub requests: Vec<Encoded>,
    /// Entries dropped for exceeding the ceiling alone
    pub oversized: Vec<Oversized>,
}

struct Builder {
    ceiling: usize,
    tenant: Option<String>,
    body: Vec<u8>,
    sections: usize,
    open: bool,
    lines: u64,
    bytes: u64,
}

impl Builder {
    fn new(ceiling: usize, tenant: Option<String>) -> Self {
        Self {
            ceiling,
            tenant,
            body: OPEN.to_vec(),
            sections: 0,
            open: false,
            lines: 0,
            bytes: 0,
        }
    }

    /// Size of the closed body if `entry` were appended.
    fn projected(&self, header: &[u8], entry: &[u8]) -> usize {
        let added = if self.open {
            1 + entry.len()
        } else {
            usize::from(self.sections > 0) + header.len() + entry.len()
        };
        self.body.len() + added + CLOSE.len() + CLOSE.len()
    }

    fn fits(&self, header: &[u8], entry: &[u8]) -> bool {
        self.projected(header, entry) <= self.ceiling
    }

    fn append(&mut self, header: &[u8], entry: &[u8], line_bytes: usize) {
        if self.open {
            self.body.push(b',');
        } else {
            if self.sections > 0 {
                self.body.push(b',');
            }
            self.body.extend_from_slice(header);
            self.sections += 1;
            self.open = true;
        }
        self.body.extend_from_slice(entry);
        self.lines += 1;
        self.bytes += line_bytes as u64;
    }

    fn close_section(&mut self) {
        if self.open {
            self.body.extend_from_slice(CLOSE);
            self.open = false;
        }
    }

    /// Close the body and start a fresh one for the same tenant. Returns
    /// nothing if the body holds no lines.
    fn finish(&mut self) -> Option<Encoded> {
        if self.lines == 0 {
            return None;
        }
        self.close_section();
        let mut body = std::mem::replace(&mut self.body, OPEN.to_vec());
        body.extend_from_slice(CLOSE);
        let encoded = Encoded {
            tenant: self.tenant.clone(),
            body,
            lines: self.lines,
            bytes: self.bytes,
        };
        self.sections = 0;
        self.lines = 0;
        self.bytes = 0;
        Some(encoded)
    }
}

fn header(key: &StreamKey) -> Result<Vec<u8>, Error> {
    let labels: BTreeMap<&str, &str> = key
        .labels()
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    let mut out = b"{\"stream\":".to_vec();
    serde_json::to_writer(&mut out, &labels)?;
    out.extend_from_slice(b",\"values\":[");
    Ok(out)
}

fn entry(entry: &Entry) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(entry.line.len() + 32);
    serde_json::to_writer(&mut out, &(entry.timestamp.to_string(), entry.line.as_str()))?;
    Ok(out)
}

/// Serialize `batch` into request bodies of at most `ceiling` bytes each.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(batch: &Batch, ceiling: usize) -> Result<Encoding, Error> {
    let mut encoding = Encoding::default();
    let mut builder: Option<Builder> = None;
    for (key, entries) in batch.iter() {
        let tenant = key.tenant().map(str::to_string);
        let current = match builder.take() {
            Some(mut b) if b.tenant != tenant => {
                encoding.requests.extend(b.finish());
                Builder::new(ceiling, tenant)
            }
            Some(mut b) => {
                b.close_section();
                b
            }
            None => Builder::new(ceiling, tenant),
        };
        let mut current = current;
        let header = header(key)?;
        for e in entries {
            let rendered = entry(e)?;
            if !current.fits(&header, &rendered) {
                encoding.requests.extend(current.finish());
                if !current.fits(&header, &rendered) {
                    encoding.oversized.push(Oversized {
                        size: current.projected(&header, &rendered),
                    });
                    continue;
                }
            }
            current.append(&header, &rendered, e.line.len());
        }
        builder = Some(current);
    }
    if let Some(mut b) = builder {
        encoding.requests.extend(b.finish());
    }
    Ok(encoding)
}

/// Gzip `body`.
///
/// # Errors
///
/// Returns an error if compression fails.
pub fn gzip(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use flate2::read::GzDecoder;
    use proptest::prelude::*;

    use super::{Batch, Entry, encode, gzip};
    use crate::stream::StreamKey;

    fn entry(timestamp: i128, line: &str) -> Entry {
        Entry {
            timestamp,
            line: line.to_string(),
        }
    }

    #[test]
    fn wire_format() {
        let key = StreamKey::new(Some("0".to_string()), [("ns", "a")]);
        let mut batch = Batch::new();
        batch.push(&key, entry(1, "hello \"world\""));
        batch.push(&key, entry(2, "bye"));

        let encoding = encode(&batch, usize::MAX).expect("encodes");
        assert!(encoding.oversized.is_empty());
        assert_eq!(encoding.requests.len(), 1);
        let request = &encoding.requests[0];
        assert_eq!(request.tenant.as_deref(), Some("0"));
        assert_eq!(request.lines, 2);
        assert_eq!(request.bytes, 16);
        assert_eq!(
            String::from_utf8(request.body.clone()).expect("utf8"),
            r#"{"streams":[{"stream":{"ns":"a"},"values":[["1","hello \"world\""],["2","bye"]]}]}"#
        );
    }

    #[test]
    fn tenants_never_share_a_request() {
        let mut batch = Batch::new();
        batch.push(
            &StreamKey::new(Some("a".to_string()), [("ns", "x")]),
            entry(1, "one"),
        );
        batch.push(
            &StreamKey::new(Some("b".to_string()), [("ns", "x")]),
            entry(1, "two"),
        );
        batch.push(&StreamKey::new(None, [("ns", "x")]), entry(1, "three"));
        let encoding = encode(&batch, usize::MAX).expect("encodes");
        let tenants: Vec<Option<&str>> = encoding
            .requests
            .iter()
            .map(|r| r.tenant.as_deref())
            .collect();
        assert_eq!(tenants, vec![None, Some("a"), Some("b")]);
    }

    #[test]
    fn oversized_entry_is_reported() {
        let key = StreamKey::new(None, [("ns", "a")]);
        let mut batch = Batch::new();
        batch.push(&key, entry(1, "short"));
        batch.push(&key, entry(2, &"x".repeat(200)));
        batch.push(&key, entry(3, "short"));
        let encoding = encode(&batch, 100).expect("encodes");
        assert_eq!(encoding.oversized.len(), 1);
        assert!(encoding.oversized[0].size > 100);
        let lines: u64 = encoding.requests.iter().map(|r| r.lines).sum();
        assert_eq!(lines, 2);
    }

    #[test]
    fn gzip_is_transparent() {
        let body = br#"{"streams":[]}"#.repeat(100);
        let compressed = gzip(&body).expect("compresses");
        assert!(compressed.len() < body.len());
        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .expect("decompresses");
        assert_eq!(decoded, body);
    }

    #[test]
    fn sort_orders_each_stream() {
        let key = StreamKey::new(None, [("ns", "a")]);
        let mut batch = Batch::new();
        batch.push(&key, entry(3, "c"));
        batch.push(&key, entry(1, "a"));
        batch.push(&key, entry(1, "b"));
        batch.sort();
        let lines: Vec<&str> = batch
            .entries(&key)
            .expect("stream present")
            .iter()
            .map(|e| e.line.as_str())
            .collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    // Every body respects the ceiling and, read back in order, reproduces
    // every stream's entries in their original order.
    proptest! {
        #[test]
        fn ceiling_and_order_hold(
            ceiling in 120_usize..2_000,
            lines in proptest::collection::vec((0_usize..3, 1_usize..60), 1..200),
        ) {
            let keys: Vec<StreamKey> = (0..3)
                .map(|i| StreamKey::new(Some("t".to_string()), [("idx", i.to_string())]))
                .collect();
            let mut batch = Batch::new();
            for (ts, (stream, len)) in lines.iter().enumerate() {
                batch.push(&keys[*stream], entry(ts as i128, &"l".repeat(*len)));
            }

            let encoding = encode(&batch, ceiling).expect("encodes");
            prop_assert!(encoding.oversized.is_empty());

            let mut seen: Vec<Vec<(String, String)>> = vec![Vec::new(); 3];
            for request in &encoding.requests {
                prop_assert!(request.body.len() <= ceiling);
                let value: serde_json::Value =
                    serde_json::from_slice(&request.body).expect("valid json");
                for stream in value["streams"].as_array().expect("streams") {
                    let idx: usize = stream["stream"]["idx"]
                        .as_str()
                        .expect("idx")
                        .parse()
                        .expect("number");
                    for pair in stream["values"].as_array().expect("values") {
                        seen[idx].push((
                            pair[0].as_str().expect("ts").to_string(),
                            pair[1].as_str().expect("line").to_string(),
                        ));
                    }
                }
            }
            for (idx, key) in keys.iter().enumerate() {
                let expected: Vec<(String, String)> = batch
                    .entries(key)
                    .unwrap_or(&[])
                    .iter()
                    .map(|e| (e.timestamp.to_string(), e.line.clone()))
                    .collect();
                prop_assert_eq!(&seen[idx], &expected);
            }
        }
    }
}
