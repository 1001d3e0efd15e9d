//! `metrics`-crate-backed [`MetricsPort`] (`spec.md` §6).
//!
//! Exported format (Prometheus, StatsD, …) is explicitly out of scope; this
//! adapter only emits through the `metrics` facade's fire-and-forget
//! macros, matching the facade-over-exporter split used elsewhere in the
//! retrieval pack's workflow-engine crates.

use metrics::{counter, gauge, histogram};

use crate::domain::{JobKind, Plan};
use crate::ports::MetricsPort;

fn kind_label(kind: JobKind) -> &'static str {
    match kind {
        JobKind::PdfOp => "pdf_op",
        JobKind::OcrClassic => "ocr_classic",
        JobKind::OcrAi => "ocr_ai",
        JobKind::OfficeToPdf => "office_to_pdf",
    }
}

fn plan_label(plan: Plan) -> &'static str {
    match plan {
        Plan::Pro => "pro",
        Plan::Premium => "premium",
        Plan::Corporate => "corporate",
        Plan::Free => "free",
    }
}

/// Adapter over the `metrics` crate's global recorder.
///
/// Installing a concrete exporter (Prometheus, StatsD, …) is the binary's
/// responsibility; this adapter only ever calls the facade macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeMetrics;

impl MetricsPort for FacadeMetrics {
    fn record_enqueue(&self, kind: JobKind, plan: Plan) {
        counter!("docflow_enqueued_total", "kind" => kind_label(kind), "plan" => plan_label(plan)).increment(1);
    }

    fn record_cancel(&self, kind: JobKind, plan: Plan) {
        counter!("docflow_cancelled_total", "kind" => kind_label(kind), "plan" => plan_label(plan)).increment(1);
    }

    fn record_job_completed(&self, kind: JobKind, plan: Plan, duration_s: f64) {
        counter!("docflow_completed_total", "kind" => kind_label(kind), "plan" => plan_label(plan)).increment(1);
        histogram!("docflow_job_duration_seconds", "kind" => kind_label(kind)).record(duration_s);
    }

    fn record_job_result_size(&self, kind: JobKind, bytes: u64) {
        #[allow(clippy::cast_precision_loss)]
        histogram!("docflow_job_result_bytes", "kind" => kind_label(kind)).record(bytes as f64);
    }

    fn record_worker_error(&self, worker: &str, reason: &str) {
        counter!("docflow_worker_errors_total", "worker" => worker.to_owned(), "reason" => reason.to_owned())
            .increment(1);
    }

    fn set_worker_health(&self, worker: &str, queue: &str, healthy: bool) {
        gauge!("docflow_worker_healthy", "worker" => worker.to_owned(), "queue" => queue.to_owned())
            .set(if healthy { 1.0 } else { 0.0 });
    }

    fn set_worker_concurrency(&self, worker: &str, n: u32) {
        gauge!("docflow_worker_concurrency", "worker" => worker.to_owned()).set(f64::from(n));
    }

    fn record_worker_restart(&self, worker: &str, reason: &str) {
        counter!("docflow_worker_restarts_total", "worker" => worker.to_owned(), "reason" => reason.to_owned())
            .increment(1);
    }
}

/// No-op [`MetricsPort`] for unit tests that don't care about metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsPort for NullMetrics {
    fn record_enqueue(&self, _kind: JobKind, _plan: Plan) {}
    fn record_cancel(&self, _kind: JobKind, _plan: Plan) {}
    fn record_job_completed(&self, _kind: JobKind, _plan: Plan, _duration_s: f64) {}
    fn record_job_result_size(&self, _kind: JobKind, _bytes: u64) {}
    fn record_worker_error(&self, _worker: &str, _reason: &str) {}
    fn set_worker_health(&self, _worker: &str, _queue: &str, _healthy: bool) {}
    fn set_worker_concurrency(&self, _worker: &str, _n: u32) {}
    fn record_worker_restart(&self, _worker: &str, _reason: &str) {}
}
