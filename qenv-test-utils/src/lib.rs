//! qenv Test Utilities
//!
//! Shared helpers for building response envelopes and observing how a
//! reader consumes its stream.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Request identifier used by [`EnvelopeBuilder::standard`]
pub const SAMPLE_REQUEST_ID: &str = "11111111-1111-1111-1111-111111111111";

/// Builder for response envelopes that keeps members in insertion order,
/// so tests control which fields precede and which follow `results`.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeBuilder {
    members: Vec<(String, String)>,
}

impl EnvelopeBuilder {
    /// Create an empty envelope
    pub fn new() -> Self {
        Self::default()
    }

    /// `requestID`, `status: success`, rows, then trailing metrics
    pub fn standard(rows: Vec<Value>) -> Self {
        let count = rows.len() as u64;
        let size: usize = rows.iter().map(|row| row.to_string().len()).sum();
        Self::new()
            .request_id(SAMPLE_REQUEST_ID)
            .status("success")
            .results(rows)
            .metrics(json!({
                "elapsedTime": "1ms",
                "executionTime": "1ms",
                "resultCount": count,
                "resultSize": size,
            }))
    }

    /// Add an arbitrary member
    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.members.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a member whose value is raw JSON text (may be malformed on purpose)
    pub fn raw(mut self, key: &str, raw_json: &str) -> Self {
        self.members.push((key.to_string(), raw_json.to_string()));
        self
    }

    /// Add `requestID`
    pub fn request_id(self, id: &str) -> Self {
        self.field("requestID", Value::String(id.to_string()))
    }

    /// Add `clientContextID`
    pub fn client_context_id(self, id: &str) -> Self {
        self.field("clientContextID", Value::String(id.to_string()))
    }

    /// Add `status`
    pub fn status(self, status: &str) -> Self {
        self.field("status", Value::String(status.to_string()))
    }

    /// Add `signature`
    pub fn signature(self, signature: Value) -> Self {
        self.field("signature", signature)
    }

    /// Add `profile`
    pub fn profile(self, profile: Value) -> Self {
        self.field("profile", profile)
    }

    /// Add `results`
    pub fn results(self, rows: Vec<Value>) -> Self {
        self.field("results", Value::Array(rows))
    }

    /// Add `warnings` from (code, msg) pairs
    pub fn warnings(self, entries: &[(i64, &str)]) -> Self {
        self.field("warnings", diagnostics(entries))
    }

    /// Add `errors` from (code, msg) pairs
    pub fn errors(self, entries: &[(i64, &str)]) -> Self {
        self.field("errors", diagnostics(entries))
    }

    /// Add `metrics`
    pub fn metrics(self, metrics: Value) -> Self {
        self.field("metrics", metrics)
    }

    /// Render the envelope
    pub fn build(&self) -> String {
        let body: Vec<String> = self
            .members
            .iter()
            .map(|(key, value)| format!("{}:{}", Value::String(key.clone()), value))
            .collect();
        format!("{{{}}}", body.join(","))
    }

    /// Render the envelope as bytes
    pub fn build_bytes(&self) -> Vec<u8> {
        self.build().into_bytes()
    }
}

fn diagnostics(entries: &[(i64, &str)]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|(code, msg)| json!({"code": code, "msg": msg}))
            .collect(),
    )
}

/// Row type used across the reader tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRow {
    /// Row identifier
    pub id: u64,
    /// Row label
    pub name: String,
}

/// `count` sample rows as JSON values, ids starting at 0
pub fn sample_rows(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| json!({"id": i, "name": format!("row-{}", i)}))
        .collect()
}

/// Reader that hands out at most `chunk` bytes per `read` call
pub struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl ChunkedReader {
    /// Wrap `data`, returning `chunk` bytes (minimum 1) per read
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk: chunk.max(1),
        }
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(self.chunk).min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Counters shared between a [`TrackingReader`] and the test that owns it
#[derive(Debug, Default)]
pub struct StreamStats {
    bytes: AtomicU64,
    reads: AtomicUsize,
    releases: AtomicUsize,
}

impl StreamStats {
    /// Bytes handed to the consumer
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    /// Number of `read` calls
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of times the stream was dropped
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Reader that records reads and its own release
pub struct TrackingReader<R> {
    inner: R,
    stats: Arc<StreamStats>,
}

impl<R: Read> TrackingReader<R> {
    /// Wrap `inner`; the returned stats stay valid after the reader is dropped
    pub fn new(inner: R) -> (Self, Arc<StreamStats>) {
        let stats = Arc::new(StreamStats::default());
        (
            Self {
                inner,
                stats: Arc::clone(&stats),
            },
            stats,
        )
    }
}

impl<R: Read> Read for TrackingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        self.stats.bytes.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }
}

impl<R> Drop for TrackingReader<R> {
    fn drop(&mut self) {
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reader that fails after yielding `ok_bytes` bytes
pub struct FailingReader {
    data: Vec<u8>,
    pos: usize,
    ok_bytes: usize,
}

impl FailingReader {
    /// Yield the first `ok_bytes` of `data`, then fail every read
    pub fn new(data: Vec<u8>, ok_bytes: usize) -> Self {
        Self {
            data,
            pos: 0,
            ok_bytes,
        }
    }
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.ok_bytes.min(self.data.len());
        if self.pos >= limit {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        let n = (limit - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
