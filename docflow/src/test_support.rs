//! Reusable test doubles for the outbound ports, gated behind the
//! `test-support` feature so downstream integration tests (and this crate's
//! own `tests/` suite) can depend on them without pulling them into release
//! builds.
//!
//! Grounded on the corpus's in-module fakes (`pool::launcher::tests::FakeLauncher`,
//! `worker::tests::FakeOcr`/`NoopPdfOps`): atomics drive configurable
//! succeed/fail sequences, with no real process or I/O involved.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{JobKind, Plan};
use crate::pool::{LauncherError, ProcessLauncher};
use crate::ports::{
    ConversionError, ConversionPort, MetricsPort, OcrError, OcrOutcome, OcrPort, PdfOpError,
    PdfOpOutput, PdfOperation, PdfOpsPort,
};

/// Deterministic [`ConversionPort`] double: fails its first `n` calls, then
/// succeeds, writing nothing to disk.
pub struct FakeConversionPort {
    remaining_failures: AtomicU32,
    permanent: bool,
}

impl FakeConversionPort {
    /// Every call succeeds.
    #[must_use]
    pub fn always_succeeds() -> Self {
        Self { remaining_failures: AtomicU32::new(0), permanent: false }
    }

    /// Every call fails with a transient [`ConversionError::Unavailable`].
    #[must_use]
    pub fn always_fails() -> Self {
        Self { remaining_failures: AtomicU32::new(u32::MAX), permanent: false }
    }

    /// Every call fails with a non-retryable [`ConversionError::Permanent`].
    #[must_use]
    pub fn always_fails_permanently() -> Self {
        Self { remaining_failures: AtomicU32::new(u32::MAX), permanent: true }
    }

    /// The first `n` calls fail transiently; calls after that succeed.
    #[must_use]
    pub fn first_n_fail(n: u32) -> Self {
        Self { remaining_failures: AtomicU32::new(n), permanent: false }
    }

    fn consume_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None })
            .is_ok()
    }
}

#[async_trait]
impl ConversionPort for FakeConversionPort {
    async fn convert(
        &self,
        _input_path: &str,
        _output_path: &str,
        _endpoint: &str,
        _deadline: Duration,
    ) -> Result<(), ConversionError> {
        if self.consume_failure() {
            return Err(if self.permanent {
                ConversionError::Permanent { message: "fake conversion refused the input".to_owned() }
            } else {
                ConversionError::Unavailable { message: "fake conversion engine offline".to_owned() }
            });
        }
        Ok(())
    }

    async fn health_check(&self, _endpoint: &str) -> Result<(), ConversionError> {
        Ok(())
    }
}

/// Deterministic [`OcrPort`] double. `engine_name` is echoed back in
/// [`OcrOutcome::engine`] so fallback tests can assert which engine served
/// the request.
pub struct FakeOcrPort {
    remaining_failures: AtomicU32,
    engine_name: String,
    confidence: f64,
}

impl FakeOcrPort {
    /// Every call succeeds, reporting `engine_name` and 0.87 confidence.
    #[must_use]
    pub fn always_ok(engine_name: impl Into<String>) -> Self {
        Self { remaining_failures: AtomicU32::new(0), engine_name: engine_name.into(), confidence: 0.87 }
    }

    /// Every call fails with a transient [`OcrError::Unavailable`].
    #[must_use]
    pub fn always_fails() -> Self {
        Self { remaining_failures: AtomicU32::new(u32::MAX), engine_name: "unused".to_owned(), confidence: 0.0 }
    }

    /// The first `n` calls fail transiently; calls after that succeed.
    #[must_use]
    pub fn first_n_fail(n: u32, engine_name: impl Into<String>) -> Self {
        Self { remaining_failures: AtomicU32::new(n), engine_name: engine_name.into(), confidence: 0.87 }
    }

    /// Override the confidence reported by successful calls.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    fn consume_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None })
            .is_ok()
    }
}

#[async_trait]
impl OcrPort for FakeOcrPort {
    async fn extract_text(
        &self,
        _input_path: &str,
        _language: &str,
        _deadline: Duration,
    ) -> Result<OcrOutcome, OcrError> {
        if self.consume_failure() {
            return Err(OcrError::Unavailable { message: "fake ocr engine offline".to_owned() });
        }
        Ok(OcrOutcome { text: "hello".to_owned(), confidence: self.confidence, engine: self.engine_name.clone() })
    }
}

/// Deterministic [`PdfOpsPort`] double returning a fixed artifact locator.
pub struct FakePdfOpsPort {
    remaining_failures: AtomicU32,
    locator: String,
    permanent: bool,
}

impl FakePdfOpsPort {
    /// Every call succeeds, returning an artifact at `locator`.
    #[must_use]
    pub fn always_succeeds(locator: impl Into<String>) -> Self {
        Self { remaining_failures: AtomicU32::new(0), locator: locator.into(), permanent: false }
    }

    /// Every call fails with a transient [`PdfOpError::Unavailable`].
    #[must_use]
    pub fn always_fails() -> Self {
        Self { remaining_failures: AtomicU32::new(u32::MAX), locator: String::new(), permanent: false }
    }

    /// Every call fails with a non-retryable [`PdfOpError::Permanent`].
    #[must_use]
    pub fn always_fails_permanently() -> Self {
        Self { remaining_failures: AtomicU32::new(u32::MAX), locator: String::new(), permanent: true }
    }

    fn consume_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None })
            .is_ok()
    }
}

#[async_trait]
impl PdfOpsPort for FakePdfOpsPort {
    async fn run(
        &self,
        _operation: PdfOperation,
        _inputs: &[String],
        _params: &Value,
        _deadline: Duration,
    ) -> Result<PdfOpOutput, PdfOpError> {
        if self.consume_failure() {
            return Err(if self.permanent {
                PdfOpError::Permanent { message: "fake pdf engine rejected the input".to_owned() }
            } else {
                PdfOpError::Unavailable { message: "fake pdf engine offline".to_owned() }
            });
        }
        Ok(PdfOpOutput::Artifact { locator: self.locator.clone() })
    }
}

/// One recorded [`MetricsPort`] call, for assertions in tests that care
/// which metrics fired and in what order.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsCall {
    Enqueue { kind: JobKind, plan: Plan },
    Cancel { kind: JobKind, plan: Plan },
    JobCompleted { kind: JobKind, plan: Plan, duration_s: f64 },
    JobResultSize { kind: JobKind, bytes: u64 },
    WorkerError { worker: String, reason: String },
    WorkerHealth { worker: String, queue: String, healthy: bool },
    WorkerConcurrency { worker: String, n: u32 },
    WorkerRestart { worker: String, reason: String },
}

/// [`MetricsPort`] double that records every call for later inspection,
/// instead of discarding them like [`crate::outbound::metrics::NullMetrics`].
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    calls: Mutex<Vec<MetricsCall>>,
}

impl RecordingMetrics {
    /// A fresh recorder with no calls yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every call recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MetricsCall> {
        self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn push(&self, call: MetricsCall) {
        self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(call);
    }
}

impl MetricsPort for RecordingMetrics {
    fn record_enqueue(&self, kind: JobKind, plan: Plan) {
        self.push(MetricsCall::Enqueue { kind, plan });
    }

    fn record_cancel(&self, kind: JobKind, plan: Plan) {
        self.push(MetricsCall::Cancel { kind, plan });
    }

    fn record_job_completed(&self, kind: JobKind, plan: Plan, duration_s: f64) {
        self.push(MetricsCall::JobCompleted { kind, plan, duration_s });
    }

    fn record_job_result_size(&self, kind: JobKind, bytes: u64) {
        self.push(MetricsCall::JobResultSize { kind, bytes });
    }

    fn record_worker_error(&self, worker: &str, reason: &str) {
        self.push(MetricsCall::WorkerError { worker: worker.to_owned(), reason: reason.to_owned() });
    }

    fn set_worker_health(&self, worker: &str, queue: &str, healthy: bool) {
        self.push(MetricsCall::WorkerHealth { worker: worker.to_owned(), queue: queue.to_owned(), healthy });
    }

    fn set_worker_concurrency(&self, worker: &str, n: u32) {
        self.push(MetricsCall::WorkerConcurrency { worker: worker.to_owned(), n });
    }

    fn record_worker_restart(&self, worker: &str, reason: &str) {
        self.push(MetricsCall::WorkerRestart { worker: worker.to_owned(), reason: reason.to_owned() });
    }
}

/// Deterministic [`ProcessLauncher`] double: every `start` succeeds with no
/// real OS process, for pool tests that need a real [`crate::pool::ProcessPool`]
/// without shelling out to a converter binary.
#[derive(Default)]
pub struct FakeProcessLauncher {
    calls: AtomicU32,
}

impl FakeProcessLauncher {
    /// Every `start` call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `start` calls observed so far.
    #[must_use]
    pub fn start_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLauncher for FakeProcessLauncher {
    async fn start(&self, _endpoint: &str) -> Result<(), LauncherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _endpoint: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conversion_double_fails_then_succeeds() {
        let port = FakeConversionPort::first_n_fail(2);
        assert!(port.convert("in", "out", "ep", Duration::from_secs(1)).await.is_err());
        assert!(port.convert("in", "out", "ep", Duration::from_secs(1)).await.is_err());
        assert!(port.convert("in", "out", "ep", Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn ocr_double_reports_configured_engine_name() {
        let port = FakeOcrPort::always_ok("classic_fallback");
        let outcome = port.extract_text("in", "en", Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome.engine, "classic_fallback");
    }

    #[tokio::test]
    async fn pdf_ops_double_returns_configured_locator() {
        let port = FakePdfOpsPort::always_succeeds("merged.pdf");
        let result = port
            .run(PdfOperation::Merge, &["a.pdf".to_owned(), "b.pdf".to_owned()], &Value::Null, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, PdfOpOutput::Artifact { locator: "merged.pdf".to_owned() });
    }

    #[test]
    fn recording_metrics_captures_calls_in_order() {
        let metrics = RecordingMetrics::new();
        metrics.record_enqueue(JobKind::OcrAi, Plan::Pro);
        metrics.set_worker_concurrency("w1", 4);
        assert_eq!(
            metrics.calls(),
            vec![
                MetricsCall::Enqueue { kind: JobKind::OcrAi, plan: Plan::Pro },
                MetricsCall::WorkerConcurrency { worker: "w1".to_owned(), n: 4 },
            ]
        );
    }
}
