//! Worker runtime (`spec.md` §4.F).
//!
//! Purpose: per-kind long-lived tasks that loop pull → execute → report,
//! writing successful outcomes back to the cache and status store and
//! handing failures to the retry glue. Cancellation and timeouts are
//! expressed with `tokio::select!` over `tokio::sync::Notify` and
//! deadlines, the same hand-rolled shape used by [`crate::queue`] and
//! [`crate::pool`], rather than pulling in `tokio_util::CancellationToken`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docflow_backoff::{Decision, JitterSource, RetryPolicy};
use mockable::Clock;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::domain::{DlqRecord, Job, JobId, JobKind, Ticket};
use crate::dlq::DlqStore;
use crate::error::{Error, ErrorKind};
use crate::health::WorkerRegistry;
use crate::outbound::files::FileLayout;
use crate::pool::ProcessPool;
use crate::ports::{ConversionError, MetricsPort, OcrError, OcrPort, PdfOpError, PdfOperation, PdfOpOutput, PdfOpsPort};
use crate::queue::{JobQueue, WeightedPuller};
use crate::status::{JobOutcome, JobStatusRecord, StatusFailure, StatusStore};

/// Tunables for one worker (`spec.md` §6 `queue.concurrency.<worker>`).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker name, used in logs, metrics labels, and config keys.
    pub name: String,
    /// Number of concurrent pull/execute/report loops.
    pub concurrency: u32,
    /// Bounded drain period given to in-flight work on shutdown before cancellation.
    pub drain_timeout: Duration,
}

/// The concrete collaborators a worker dispatches to, by job kind. A
/// worker need not be configured for every kind — only the ones whose
/// queues it is bound to.
#[derive(Default, Clone)]
pub struct WorkerPorts {
    /// Warm process pool, used for `office-to-pdf`.
    pub pool: Option<Arc<ProcessPool>>,
    /// Classic OCR engine, used for `ocr-classic` and as the `ocr-ai` fallback.
    pub ocr_classic: Option<Arc<dyn OcrPort>>,
    /// AI vision OCR engine, used for `ocr-ai`.
    pub ocr_ai: Option<Arc<dyn OcrPort>>,
    /// Named PDF operations engine, used for `pdf-op`.
    pub pdf_ops: Option<Arc<dyn PdfOpsPort>>,
}

/// The outcome of successfully executing one ticket.
struct ExecutionOutcome {
    artifact_locator: Option<String>,
    meta: Value,
    size: u64,
    engine: Option<String>,
}

/// A worker runtime bound to a weighted set of queues.
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    puller: WeightedPuller,
    ports: WorkerPorts,
    cache: Arc<CacheStore>,
    status: Arc<StatusStore>,
    dlq: Arc<DlqStore>,
    metrics: Arc<dyn MetricsPort>,
    retry_policy: RetryPolicy,
    jitter: Box<dyn JitterSource + Send + Sync>,
    clock: Arc<dyn Clock>,
    files: Option<Arc<FileLayout>>,
    registry: Option<Arc<WorkerRegistry>>,
    shutting_down: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl Worker {
    /// Build a worker bound to `weights` (queue name, relative weight)
    /// against the shared [`JobQueue`].
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WorkerConfig,
        queue: Arc<JobQueue>,
        weights: Vec<(String, u32)>,
        ports: WorkerPorts,
        cache: Arc<CacheStore>,
        status: Arc<StatusStore>,
        dlq: Arc<DlqStore>,
        metrics: Arc<dyn MetricsPort>,
        retry_policy: RetryPolicy,
        jitter: Box<dyn JitterSource + Send + Sync>,
        clock: Arc<dyn Clock>,
        files: Option<Arc<FileLayout>>,
        registry: Option<Arc<WorkerRegistry>>,
    ) -> Self {
        let puller = WeightedPuller::new(Arc::clone(&queue), weights);
        Self {
            config,
            queue,
            puller,
            ports,
            cache,
            status,
            dlq,
            metrics,
            retry_policy,
            jitter,
            clock,
            files,
            registry,
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Spawn `config.concurrency` independent pull/execute/report loops.
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.concurrency.max(1))
            .map(|lane| {
                let worker = Arc::clone(self);
                tokio::spawn(async move { worker.run_loop(lane).await })
            })
            .collect()
    }

    /// Signal every loop spawned from this worker to stop pulling new
    /// tickets. Callers should await the `JoinHandle`s from [`Self::spawn`]
    /// with `config.drain_timeout`, then abort them if still running
    /// (`spec.md` §4.F graceful shutdown).
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    async fn run_loop(&self, lane: u32) {
        self.metrics.set_worker_concurrency(&self.config.name, self.config.concurrency);
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                debug!(worker = %self.config.name, lane, "worker lane stopping: shutdown in progress");
                return;
            }
            if let Some(registry) = &self.registry {
                registry.heartbeat(&self.config.name, self.clock.utc());
            }
            let Some(ticket) = self.puller.next(&self.shutdown_notify).await else {
                if self.shutting_down.load(Ordering::SeqCst) {
                    return;
                }
                continue;
            };
            self.metrics.set_worker_health(&self.config.name, ticket.job.kind.primary_queue(), true);
            self.handle_ticket(ticket).await;
        }
    }

    async fn handle_ticket(&self, ticket: Ticket) {
        let job_id = ticket.job.job_id;
        let started = self.clock.utc();
        let result = tokio::time::timeout(ticket.timeout, self.execute(&ticket)).await;

        match result {
            Err(_elapsed) => {
                self.on_failure(&ticket, Error::timeout("ticket exceeded its dispatch timeout")).await;
            }
            Ok(Ok(outcome)) => self.on_success(&ticket, started, outcome).await,
            Ok(Err(err)) => self.on_failure(&ticket, err).await,
        }

        let _ = job_id;
    }

    async fn execute(&self, ticket: &Ticket) -> Result<ExecutionOutcome, Error> {
        match ticket.job.kind {
            JobKind::OfficeToPdf => self.execute_office_to_pdf(ticket).await,
            JobKind::OcrClassic => self.execute_ocr_classic(ticket).await,
            JobKind::OcrAi => self.execute_ocr_ai(ticket).await,
            JobKind::PdfOp => self.execute_pdf_op(ticket).await,
        }
    }

    async fn execute_office_to_pdf(&self, ticket: &Ticket) -> Result<ExecutionOutcome, Error> {
        let pool = self
            .ports
            .pool
            .as_ref()
            .ok_or_else(|| Error::validation("worker has no process pool configured for office-to-pdf"))?;
        let stem = ticket.job.job_id.to_string();
        let output_path = self
            .files
            .as_ref()
            .map(|layout| layout.processed_path(&stem, "pdf"))
            .unwrap_or_else(|| std::path::PathBuf::from(format!("{stem}_processed.pdf")));
        let output_path = output_path.to_string_lossy().into_owned();

        let (cancel, watch) = spawn_cancel_watch(Arc::clone(&self.queue), ticket.job.job_id);
        let result = pool.convert(&ticket.job.payload.input_locator, &output_path, &cancel).await;
        watch.abort();

        result
            .map(|()| ExecutionOutcome {
                artifact_locator: Some(output_path),
                meta: Value::Null,
                size: 0,
                engine: None,
            })
            .map_err(conversion_error_to_fabric)
    }

    async fn execute_ocr_classic(&self, ticket: &Ticket) -> Result<ExecutionOutcome, Error> {
        let classic = self
            .ports
            .ocr_classic
            .as_ref()
            .ok_or_else(|| Error::validation("worker has no classic OCR engine configured"))?;
        let language = language_param(ticket);
        let outcome = classic
            .extract_text(&ticket.job.payload.input_locator, &language, ticket.timeout)
            .await
            .map_err(ocr_error_to_fabric)?;
        Ok(ExecutionOutcome {
            artifact_locator: None,
            meta: serde_json::json!({ "text": outcome.text, "confidence": outcome.confidence }),
            size: outcome.text.len() as u64,
            engine: Some(outcome.engine),
        })
    }

    async fn execute_ocr_ai(&self, ticket: &Ticket) -> Result<ExecutionOutcome, Error> {
        let ai = self
            .ports
            .ocr_ai
            .as_ref()
            .ok_or_else(|| Error::validation("worker has no AI OCR engine configured"))?;
        let language = language_param(ticket);
        match ai.extract_text(&ticket.job.payload.input_locator, &language, ticket.timeout).await {
            Ok(outcome) => Ok(ExecutionOutcome {
                artifact_locator: None,
                meta: serde_json::json!({ "text": outcome.text, "confidence": outcome.confidence }),
                size: outcome.text.len() as u64,
                engine: Some(outcome.engine),
            }),
            Err(ai_err) => {
                warn!(worker = %self.config.name, error = %ai_err, "ocr-ai failed, falling back to classic");
                self.metrics.record_worker_error(&self.config.name, "ai_error");
                let classic = self
                    .ports
                    .ocr_classic
                    .as_ref()
                    .ok_or_else(|| Error::validation("worker has no classic OCR fallback configured"))?;
                let outcome = classic
                    .extract_text(&ticket.job.payload.input_locator, &language, ticket.timeout)
                    .await
                    .map_err(ocr_error_to_fabric)?;
                Ok(ExecutionOutcome {
                    artifact_locator: None,
                    meta: serde_json::json!({ "text": outcome.text, "confidence": outcome.confidence }),
                    size: outcome.text.len() as u64,
                    engine: Some("classic_fallback".to_owned()),
                })
            }
        }
    }

    async fn execute_pdf_op(&self, ticket: &Ticket) -> Result<ExecutionOutcome, Error> {
        let pdf_ops = self
            .ports
            .pdf_ops
            .as_ref()
            .ok_or_else(|| Error::validation("worker has no pdf operations engine configured"))?;
        let params = &ticket.job.payload.params;
        let operation_value = params
            .get("operation")
            .ok_or_else(|| Error::validation("pdf-op job is missing an \"operation\" parameter"))?;
        let operation: PdfOperation = serde_json::from_value(operation_value.clone())
            .map_err(|e| Error::validation(format!("unrecognised pdf operation: {e}")))?;
        let inputs = match params.get("inputs").and_then(Value::as_array) {
            Some(values) => values.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
            None => vec![ticket.job.payload.input_locator.clone()],
        };
        let op_params = Value::Object(params.clone().into_iter().collect());
        let output = pdf_ops
            .run(operation, &inputs, &op_params, ticket.timeout)
            .await
            .map_err(pdf_op_error_to_fabric)?;
        Ok(match output {
            PdfOpOutput::Artifact { locator } => ExecutionOutcome {
                artifact_locator: Some(locator),
                meta: Value::Null,
                size: 0,
                engine: None,
            },
            PdfOpOutput::Info(info) => ExecutionOutcome {
                artifact_locator: None,
                meta: info,
                size: 0,
                engine: None,
            },
        })
    }

    async fn on_success(&self, ticket: &Ticket, started: chrono::DateTime<Utc>, outcome: ExecutionOutcome) {
        let job = &ticket.job;
        self.queue.report_success(job.job_id);

        let record = JobStatusRecord {
            job_id: job.job_id,
            user_id: job.user_id.clone(),
            kind: job.kind,
            state: crate::domain::JobState::Completed,
            progress_pct: Some(100),
            progress_message: None,
            outcome: Some(JobOutcome {
                artifact_locator: outcome.artifact_locator.clone(),
                meta: outcome.meta.clone(),
                engine: outcome.engine.clone(),
            }),
            failure: None,
            created_at: job.created_at,
            updated_at: self.clock.utc(),
        };
        if let Err(err) = self.status.save(record).await {
            warn!(worker = %self.config.name, job = %job.job_id, error = %err, "failed to save completed status");
        }

        if let Some(locator) = &outcome.artifact_locator {
            if let Some(file_hash) = job.payload.params.get("file_hash").and_then(Value::as_str) {
                let operation = operation_label(job);
                let set_result = self
                    .cache
                    .set(file_hash, &operation, &job.payload.params, locator.clone(), outcome.meta.clone(), outcome.size)
                    .await;
                if let Err(err) = set_result {
                    debug!(worker = %self.config.name, job = %job.job_id, error = %err, "best-effort cache write-back failed");
                }
            }
        }

        let duration_s = (self.clock.utc() - started).num_milliseconds().max(0) as f64 / 1000.0;
        self.metrics.record_job_completed(job.kind, job.plan, duration_s);
        if outcome.size > 0 {
            self.metrics.record_job_result_size(job.kind, outcome.size);
        }
    }

    async fn on_failure(&self, ticket: &Ticket, error: Error) {
        let job = &ticket.job;
        self.metrics.record_worker_error(&self.config.name, &error.kind().to_string());

        if error.kind() == ErrorKind::Cancelled {
            self.queue.report_terminal(job.job_id);
            self.save_failure_status(job, crate::domain::JobState::Cancelled, &error).await;
            self.metrics.record_cancel(job.kind, job.plan);
            return;
        }

        let policy = self.retry_policy.with_max_attempts(job.kind.default_max_attempts());
        let decision = crate::retry::evaluate(&policy, job.attempt, error.kind(), self.jitter.as_ref());

        match decision {
            Decision::RetryAfter(delay) => {
                let not_before = self.clock.utc() + chrono::Duration::from_std(delay).unwrap_or_default();
                if let Err(requeue_err) = self.queue.report_retry(job.job_id, not_before) {
                    warn!(worker = %self.config.name, job = %job.job_id, error = %requeue_err, "failed to requeue after transient failure");
                }
                self.save_failure_status(job, crate::domain::JobState::Pending, &error).await;
            }
            Decision::GiveUp => {
                self.queue.report_terminal(job.job_id);
                self.save_failure_status(job, crate::domain::JobState::Failed, &error).await;
                let record = DlqRecord::new(job.clone(), error.message(), self.clock.utc());
                if let Err(dlq_err) = self.dlq.park(record).await {
                    warn!(worker = %self.config.name, job = %job.job_id, error = %dlq_err, "failed to park terminally failed job");
                }
            }
        }
    }

    async fn save_failure_status(&self, job: &Job, state: crate::domain::JobState, error: &Error) {
        let record = JobStatusRecord {
            job_id: job.job_id,
            user_id: job.user_id.clone(),
            kind: job.kind,
            state,
            progress_pct: None,
            progress_message: None,
            outcome: None,
            failure: Some(StatusFailure {
                kind: error.kind(),
                message: error.message().to_owned(),
            }),
            created_at: job.created_at,
            updated_at: self.clock.utc(),
        };
        if let Err(err) = self.status.save(record).await {
            warn!(worker = %self.config.name, job = %job.job_id, error = %err, "failed to save failure status");
        }
    }
}

fn language_param(ticket: &Ticket) -> String {
    ticket
        .job
        .payload
        .params
        .get("language")
        .and_then(Value::as_str)
        .unwrap_or("eng")
        .to_owned()
}

fn operation_label(job: &Job) -> String {
    match job.kind {
        JobKind::OfficeToPdf => "office_to_pdf".to_owned(),
        JobKind::OcrClassic => "ocr_classic".to_owned(),
        JobKind::OcrAi => "ocr_ai".to_owned(),
        JobKind::PdfOp => job
            .payload
            .params
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("pdf_op")
            .to_owned(),
    }
}

fn conversion_error_to_fabric(err: ConversionError) -> Error {
    match err {
        ConversionError::Unavailable { message } => Error::upstream_unavailable(message),
        ConversionError::Timeout => Error::timeout("conversion exceeded its deadline"),
        ConversionError::Permanent { message } => Error::permanent_conversion(message),
        ConversionError::Internal { message } => Error::internal_conversion(message),
    }
}

fn ocr_error_to_fabric(err: OcrError) -> Error {
    match err {
        OcrError::Unavailable { message } => Error::upstream_unavailable(message),
        OcrError::Timeout => Error::timeout("ocr call exceeded its deadline"),
        OcrError::Permanent { message } => Error::permanent_conversion(message),
        OcrError::Internal { message } => Error::internal_conversion(message),
    }
}

fn pdf_op_error_to_fabric(err: PdfOpError) -> Error {
    match err {
        PdfOpError::Unavailable { message } => Error::upstream_unavailable(message),
        PdfOpError::Timeout => Error::timeout("pdf operation exceeded its deadline"),
        PdfOpError::Permanent { message } => Error::permanent_conversion(message),
        PdfOpError::Internal { message } => Error::internal_conversion(message),
    }
}

/// Poll `queue.is_cancel_requested(job_id)` and notify a fresh `Notify` once
/// cancellation is observed. The queue only exposes a cancellation flag (not
/// its internal per-ticket `Notify`) across this boundary, so this mirrors
/// the 50ms polling cadence [`JobQueue::pull_one`] itself uses.
fn spawn_cancel_watch(queue: Arc<JobQueue>, job_id: JobId) -> (Arc<Notify>, JoinHandle<()>) {
    let notify = Arc::new(Notify::new());
    let watcher = Arc::clone(&notify);
    let handle = tokio::spawn(async move {
        loop {
            if queue.is_cancel_requested(job_id) {
                watcher.notify_waiters();
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });
    (notify, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobPayload, Plan};
    use crate::outbound::memory::MemoryStore;
    use crate::outbound::metrics::NullMetrics;
    use crate::retry::resolve_jitter;
    use crate::retry::JitterKind;
    use async_trait::async_trait;
    use mockable::DefaultClock;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU32;

    struct FakeOcr {
        fail_count: AtomicU32,
        engine_name: &'static str,
    }

    impl FakeOcr {
        fn always_ok(engine_name: &'static str) -> Self {
            Self { fail_count: AtomicU32::new(0), engine_name }
        }

        fn always_fails() -> Self {
            Self { fail_count: AtomicU32::new(u32::MAX), engine_name: "unused" }
        }
    }

    #[async_trait]
    impl OcrPort for FakeOcr {
        async fn extract_text(
            &self,
            _input_path: &str,
            _language: &str,
            _deadline: Duration,
        ) -> Result<crate::ports::OcrOutcome, OcrError> {
            if self.fail_count.load(Ordering::SeqCst) > 0 {
                self.fail_count.fetch_sub(1, Ordering::SeqCst);
                return Err(OcrError::Unavailable { message: "engine offline".to_owned() });
            }
            Ok(crate::ports::OcrOutcome {
                text: "hello".to_owned(),
                confidence: 0.87,
                engine: self.engine_name.to_owned(),
            })
        }
    }

    fn harness(ports: WorkerPorts) -> Worker {
        let store: Arc<dyn crate::ports::BackingStore> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let queue = Arc::new(JobQueue::new(&["ocr", "pdf", "office"], 100));
        Worker::new(
            WorkerConfig {
                name: "test-worker".to_owned(),
                concurrency: 1,
                drain_timeout: Duration::from_secs(1),
            },
            queue,
            vec![("ocr".to_owned(), 1), ("pdf".to_owned(), 1), ("office".to_owned(), 1)],
            ports,
            Arc::new(CacheStore::new(Arc::clone(&store), Arc::clone(&clock), Duration::from_secs(3600))),
            Arc::new(StatusStore::new(Arc::clone(&store), Arc::clone(&clock), Duration::from_secs(3600), Duration::from_secs(3600))),
            Arc::new(DlqStore::new(Arc::clone(&store), Arc::clone(&clock))),
            Arc::new(NullMetrics),
            RetryPolicy::defaults(),
            resolve_jitter(JitterKind::Zero),
            clock,
            None,
            None,
        )
    }

    fn ocr_job(kind: JobKind) -> Job {
        Job::new(None, kind, Plan::Free, "user-1", JobPayload::new("in.png", BTreeMap::new()), Utc::now(), None)
    }

    #[tokio::test]
    async fn ocr_ai_falls_back_to_classic_and_tags_the_engine() {
        let worker = harness(WorkerPorts {
            ocr_ai: Some(Arc::new(FakeOcr::always_fails())),
            ocr_classic: Some(Arc::new(FakeOcr::always_ok("classic"))),
            ..WorkerPorts::default()
        });
        let job = ocr_job(JobKind::OcrAi);
        let job_id = job.job_id;
        worker.queue.enqueue(job, Utc::now(), Duration::from_secs(30)).unwrap();
        let ticket = worker.queue.pull_one("ocr", &Notify::new()).await.unwrap();

        worker.handle_ticket(ticket).await;

        let record = worker.status.get(job_id).await.unwrap().unwrap();
        assert_eq!(record.state, crate::domain::JobState::Completed);
        assert_eq!(record.outcome.unwrap().engine.as_deref(), Some("classic_fallback"));
    }

    #[tokio::test]
    async fn pdf_op_without_operation_param_is_validation_and_parks_immediately() {
        let worker = harness(WorkerPorts {
            pdf_ops: Some(Arc::new(NoopPdfOps)),
            ..WorkerPorts::default()
        });
        let job = Job::new(
            None,
            JobKind::PdfOp,
            Plan::Free,
            "user-1",
            JobPayload::new("in.pdf", BTreeMap::new()),
            Utc::now(),
            None,
        );
        let job_id = job.job_id;
        worker.queue.enqueue(job, Utc::now(), Duration::from_secs(30)).unwrap();
        let ticket = worker.queue.pull_one("pdf", &Notify::new()).await.unwrap();

        worker.handle_ticket(ticket).await;

        let record = worker.status.get(job_id).await.unwrap().unwrap();
        assert_eq!(record.state, crate::domain::JobState::Failed);
        let parked = worker.dlq.list(JobKind::PdfOp, 10).await.unwrap();
        assert_eq!(parked.len(), 1);
    }

    struct NoopPdfOps;

    #[async_trait]
    impl PdfOpsPort for NoopPdfOps {
        async fn run(
            &self,
            _operation: PdfOperation,
            _inputs: &[String],
            _params: &Value,
            _deadline: Duration,
        ) -> Result<PdfOpOutput, PdfOpError> {
            Ok(PdfOpOutput::Artifact { locator: "out.pdf".to_owned() })
        }
    }
}
