//! Domain ports defining the edges of the hexagon (`spec.md` §6).
//!
//! Ports describe how the fabric expects to interact with driven adapters
//! (backing store, conversion engines, OCR pipelines, metrics exporters).
//! Each trait exposes a strongly typed error so adapters map their
//! failures into predictable variants instead of returning `anyhow::Result`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::{JobKind, Plan};

/// Errors surfaced by a [`BackingStore`] adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store is unreachable or timed out.
    #[error("backing store unavailable: {message}")]
    Unavailable {
        /// Adapter-supplied detail.
        message: String,
    },
    /// A stored value could not be (de)serialised.
    #[error("backing store serialization failed: {message}")]
    Serialization {
        /// Adapter-supplied detail.
        message: String,
    },
}

impl StoreError {
    /// Helper for connectivity failures.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Helper for (de)serialisation failures.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

/// Key-value backing store used by the cache, status store, DLQ, and queue
/// (`spec.md` §6).
///
/// Two conforming implementations — an in-memory test double
/// ([`crate::outbound::memory::MemoryStore`]) and a production store
/// ([`crate::outbound::redis::RedisStore`]) — must interoperate via this
/// single port.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Fetch the raw bytes stored at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` at `key`, replacing any existing value.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete `key`. Returns whether a value was present.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically add `by` to the integer stored at `key` (default 0) and
    /// return the new value.
    async fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError>;

    /// List keys matching a prefix or segmented glob pattern.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Append `value` to the list stored at `key`.
    async fn list_append(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Number of elements in the list stored at `key`.
    async fn list_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Pop the oldest element from the list stored at `key`.
    async fn list_pop(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Errors surfaced by the [`ConversionPort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The converter process or engine is unreachable.
    #[error("conversion engine unavailable: {message}")]
    Unavailable {
        /// Adapter-supplied detail.
        message: String,
    },
    /// The conversion exceeded its deadline.
    #[error("conversion timed out")]
    Timeout,
    /// The document cannot be converted; retrying will not help.
    #[error("document cannot be converted: {message}")]
    Permanent {
        /// Adapter-supplied detail.
        message: String,
    },
    /// An internal engine failure unrelated to the input.
    #[error("conversion engine error: {message}")]
    Internal {
        /// Adapter-supplied detail.
        message: String,
    },
}

/// Converts an input document to PDF using a warm process from the pool.
///
/// `endpoint` is the opaque handle the [`crate::pool::ProcessPool`] hands
/// to a leased [`super::process::PooledProcess`]; this port never owns a
/// process, it only ever borrows one by endpoint for the duration of one
/// call.
#[async_trait]
pub trait ConversionPort: Send + Sync {
    /// Convert `input_path` to `output_path` via the process at `endpoint`,
    /// aborting if `deadline` elapses first.
    async fn convert(
        &self,
        input_path: &str,
        output_path: &str,
        endpoint: &str,
        deadline: Duration,
    ) -> Result<(), ConversionError>;

    /// Readiness probe used while starting a pooled process.
    async fn health_check(&self, endpoint: &str) -> Result<(), ConversionError>;
}

/// Errors surfaced by the [`OcrPort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OcrError {
    /// The OCR engine is unreachable.
    #[error("ocr engine unavailable: {message}")]
    Unavailable {
        /// Adapter-supplied detail.
        message: String,
    },
    /// The OCR call exceeded its deadline.
    #[error("ocr timed out")]
    Timeout,
    /// The input cannot be OCR'd; retrying will not help.
    #[error("document cannot be processed: {message}")]
    Permanent {
        /// Adapter-supplied detail.
        message: String,
    },
    /// An internal engine failure unrelated to the input.
    #[error("ocr engine error: {message}")]
    Internal {
        /// Adapter-supplied detail.
        message: String,
    },
}

/// Extracted text and the engine's self-reported confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutcome {
    /// Extracted text.
    pub text: String,
    /// Engine confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Which engine actually produced this outcome, e.g. `classic_fallback`
    /// when the AI engine failed over.
    pub engine: String,
}

/// Text extraction, with two concrete implementations: classic and AI
/// (`spec.md` §6). The worker runtime falls back from AI to classic.
#[async_trait]
pub trait OcrPort: Send + Sync {
    /// Extract text from `input_path` in `language`.
    async fn extract_text(
        &self,
        input_path: &str,
        language: &str,
        deadline: Duration,
    ) -> Result<OcrOutcome, OcrError>;
}

/// The seven PDF operations from `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfOperation {
    /// Concatenate multiple inputs into one document.
    Merge,
    /// Split one input into multiple outputs.
    Split,
    /// Reduce file size.
    Optimize,
    /// Stamp a watermark.
    Watermark,
    /// Report structured document info.
    Info,
    /// Compress embedded resources.
    Compress,
    /// Rotate pages.
    Rotate,
}

/// Errors surfaced by the [`PdfOpsPort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PdfOpError {
    /// The PDF engine is unreachable.
    #[error("pdf engine unavailable: {message}")]
    Unavailable {
        /// Adapter-supplied detail.
        message: String,
    },
    /// The operation exceeded its deadline.
    #[error("pdf operation timed out")]
    Timeout,
    /// The document cannot be operated on; retrying will not help.
    #[error("document cannot be processed: {message}")]
    Permanent {
        /// Adapter-supplied detail.
        message: String,
    },
    /// An internal engine failure unrelated to the input.
    #[error("pdf engine error: {message}")]
    Internal {
        /// Adapter-supplied detail.
        message: String,
    },
}

/// Output of a PDF operation: either an artifact locator or structured info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PdfOpOutput {
    /// Locator of a produced artifact.
    Artifact {
        /// Where the produced document was written.
        locator: String,
    },
    /// Structured info payload (used by [`PdfOperation::Info`]).
    Info(serde_json::Value),
}

/// Named PDF operations: merge, split, optimize, watermark, info, compress, rotate.
#[async_trait]
pub trait PdfOpsPort: Send + Sync {
    /// Run `operation` over `inputs` with `params`, aborting at `deadline`.
    async fn run(
        &self,
        operation: PdfOperation,
        inputs: &[String],
        params: &serde_json::Value,
        deadline: Duration,
    ) -> Result<PdfOpOutput, PdfOpError>;
}

/// Errors surfaced by a [`SystemSamplerPort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SamplerError {
    /// The underlying OS query failed or returned no data.
    #[error("system sample unavailable: {message}")]
    Unavailable {
        /// Adapter-supplied detail.
        message: String,
    },
}

/// Host resource utilisation, sampled for the health monitor (`spec.md` §4.G).
#[async_trait]
pub trait SystemSamplerPort: Send + Sync {
    /// CPU utilisation as a percentage in `[0.0, 100.0]`.
    async fn cpu_pct(&self) -> Result<f64, SamplerError>;
    /// RAM utilisation as a percentage in `[0.0, 100.0]`.
    async fn ram_pct(&self) -> Result<f64, SamplerError>;
    /// Disk utilisation as a percentage in `[0.0, 100.0]`, for the volume
    /// backing `files.temp_dir`.
    async fn disk_pct(&self) -> Result<f64, SamplerError>;
}

/// Fire-and-forget metrics recording (`spec.md` §6).
///
/// Every method must be non-blocking and infallible from the caller's
/// perspective: adapters swallow their own export failures.
pub trait MetricsPort: Send + Sync {
    /// A job was enqueued.
    fn record_enqueue(&self, kind: JobKind, plan: Plan);
    /// A job was cancelled.
    fn record_cancel(&self, kind: JobKind, plan: Plan);
    /// A job completed successfully after `duration_s` seconds.
    fn record_job_completed(&self, kind: JobKind, plan: Plan, duration_s: f64);
    /// The size in bytes of a completed job's result.
    fn record_job_result_size(&self, kind: JobKind, bytes: u64);
    /// A worker encountered an error, tagged with a short reason.
    fn record_worker_error(&self, worker: &str, reason: &str);
    /// Current health of a worker serving a queue.
    fn set_worker_health(&self, worker: &str, queue: &str, healthy: bool);
    /// Current configured concurrency for a worker.
    fn set_worker_concurrency(&self, worker: &str, n: u32);
    /// A worker was restarted, tagged with a short reason.
    fn record_worker_restart(&self, worker: &str, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn store_error_helpers_format_message() {
        let err = StoreError::unavailable("connection refused");
        assert!(err.to_string().contains("connection refused"));
    }
}
