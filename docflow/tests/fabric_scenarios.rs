//! End-to-end scenarios driving the public API the way a deployment would:
//! enqueue a job, let a spawned [`Worker`] run it to completion, and observe
//! the result through the status store, the dead-letter store, and a
//! recording metrics double — never reaching into worker internals.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docflow::cache::CacheStore;
use docflow::dlq::DlqStore;
use docflow::domain::{Job, JobKind, JobPayload, JobState, Plan};
use docflow::error::ErrorKind;
use docflow::outbound::memory::MemoryStore;
use docflow::pool::{PoolConfig, ProcessPool};
use docflow::ports::BackingStore;
use docflow::queue::JobQueue;
use docflow::retry::{resolve_jitter, JitterKind};
use docflow::status::StatusStore;
use docflow::test_support::{FakeConversionPort, FakeOcrPort, FakePdfOpsPort, FakeProcessLauncher, RecordingMetrics};
use docflow::worker::{Worker, WorkerConfig, WorkerPorts};
use docflow_backoff::{RetryPolicy, ZeroJitter};
use mockable::DefaultClock;
use std::collections::BTreeMap;
use tokio::sync::Notify;

/// A policy with millisecond-scale delays so retry-exhaustion tests don't
/// burn real wall-clock time waiting on the spec's 30s default schedule.
fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(5), 2.0, Duration::from_millis(20), 0.0, 5)
        .expect("fast test policy is valid")
}

struct Harness {
    queue: Arc<JobQueue>,
    status: Arc<StatusStore>,
    dlq: Arc<DlqStore>,
    metrics: Arc<RecordingMetrics>,
}

fn spawn_worker(queue_names: &[&str], ports: WorkerPorts) -> (Arc<Worker>, Harness) {
    let store: Arc<dyn BackingStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(DefaultClock);
    let queue = Arc::new(JobQueue::new(queue_names, 100));
    let status = Arc::new(StatusStore::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    ));
    let dlq = Arc::new(DlqStore::new(Arc::clone(&store), Arc::clone(&clock)));
    let cache = Arc::new(CacheStore::new(Arc::clone(&store), Arc::clone(&clock), Duration::from_secs(3600)));
    let metrics = Arc::new(RecordingMetrics::new());

    let weights: Vec<(String, u32)> = queue_names.iter().map(|n| ((*n).to_owned(), 1)).collect();
    let worker = Arc::new(Worker::new(
        WorkerConfig { name: "integration-worker".to_owned(), concurrency: 1, drain_timeout: Duration::from_secs(1) },
        Arc::clone(&queue),
        weights,
        ports,
        cache,
        Arc::clone(&status),
        Arc::clone(&dlq),
        Arc::clone(&metrics) as Arc<dyn docflow::ports::MetricsPort>,
        fast_policy(),
        resolve_jitter(JitterKind::Zero),
        clock,
        None,
        None,
    ));

    (worker, Harness { queue, status, dlq, metrics })
}

async fn wait_for_terminal(status: &StatusStore, job_id: docflow::domain::JobId) -> JobStatusRecordSnapshot {
    for _ in 0..200 {
        if let Some(record) = status.get(job_id).await.expect("status lookup succeeds") {
            if record.state.is_terminal() {
                return JobStatusRecordSnapshot { state: record.state, engine: record.outcome.and_then(|o| o.engine) };
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not reach a terminal status in time");
}

struct JobStatusRecordSnapshot {
    state: JobState,
    engine: Option<String>,
}

#[tokio::test]
async fn ocr_classic_retry_exhaustion_parks_the_job_and_records_no_completion() {
    let ports = WorkerPorts { ocr_classic: Some(Arc::new(FakeOcrPort::always_fails())), ..WorkerPorts::default() };
    let (worker, harness) = spawn_worker(&["ocr"], ports);

    let job = Job::new(None, JobKind::OcrClassic, Plan::Free, "user-1", JobPayload::new("in.png", BTreeMap::new()), Utc::now(), None);
    let job_id = job.job_id;
    harness.queue.enqueue(job, Utc::now(), Duration::from_secs(5)).expect("enqueue succeeds");

    let handles = worker.spawn();
    let snapshot = wait_for_terminal(&harness.status, job_id).await;
    worker.begin_shutdown();
    for handle in handles {
        handle.abort();
    }

    assert_eq!(snapshot.state, JobState::Failed);

    let parked = harness.dlq.list(JobKind::OcrClassic, 10).await.expect("dlq list succeeds");
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].original_job.job_id, job_id);
    // default_max_attempts() for OCR kinds is 3: attempts 0, 1, 2 all fail.
    assert_eq!(parked[0].original_job.attempt, 2);

    let calls = harness.metrics.calls();
    assert!(calls.iter().all(|c| !matches!(c, docflow::test_support::MetricsCall::JobCompleted { .. })));
    assert!(calls.iter().any(|c| matches!(c, docflow::test_support::MetricsCall::WorkerError { .. })));
}

#[tokio::test]
async fn ocr_ai_fallback_reaches_classic_and_completes_via_the_public_api() {
    let ports = WorkerPorts {
        ocr_ai: Some(Arc::new(FakeOcrPort::always_fails())),
        ocr_classic: Some(Arc::new(FakeOcrPort::always_ok("classic").with_confidence(0.95))),
        ..WorkerPorts::default()
    };
    let (worker, harness) = spawn_worker(&["ocr"], ports);

    let job = Job::new(None, JobKind::OcrAi, Plan::Pro, "user-2", JobPayload::new("in.png", BTreeMap::new()), Utc::now(), None);
    let job_id = job.job_id;
    harness.queue.enqueue(job, Utc::now(), Duration::from_secs(5)).expect("enqueue succeeds");

    let handles = worker.spawn();
    let snapshot = wait_for_terminal(&harness.status, job_id).await;
    worker.begin_shutdown();
    for handle in handles {
        handle.abort();
    }

    assert_eq!(snapshot.state, JobState::Completed);
    assert_eq!(snapshot.engine.as_deref(), Some("classic_fallback"));
    assert!(harness.dlq.list(JobKind::OcrAi, 10).await.expect("dlq list succeeds").is_empty());
}

#[tokio::test]
async fn first_n_fail_double_succeeds_within_the_retry_budget() {
    let ports = WorkerPorts {
        ocr_classic: Some(Arc::new(FakeOcrPort::first_n_fail(2, "classic"))),
        ..WorkerPorts::default()
    };
    let (worker, harness) = spawn_worker(&["ocr"], ports);

    let job = Job::new(None, JobKind::OcrClassic, Plan::Corporate, "user-3", JobPayload::new("in.png", BTreeMap::new()), Utc::now(), None);
    let job_id = job.job_id;
    harness.queue.enqueue(job, Utc::now(), Duration::from_secs(5)).expect("enqueue succeeds");

    let handles = worker.spawn();
    let snapshot = wait_for_terminal(&harness.status, job_id).await;
    worker.begin_shutdown();
    for handle in handles {
        handle.abort();
    }

    assert_eq!(snapshot.state, JobState::Completed);
    assert!(harness.dlq.list(JobKind::OcrClassic, 10).await.expect("dlq list succeeds").is_empty());
}

/// Scenario 1 (`spec.md` §8): among 10 free-tier and 2 pro-tier jobs on the
/// same queue, both pro jobs dispatch before any free job despite being
/// enqueued interleaved among them.
#[tokio::test]
async fn priority_dispatch_serves_pro_jobs_before_free_jobs() {
    let queue = JobQueue::new(&["pdf"], 20);
    let now = Utc::now();
    let job = |plan: Plan| Job::new(None, JobKind::PdfOp, plan, "user", JobPayload::new("in", BTreeMap::new()), now, None);

    for i in 0..12 {
        let plan = if i == 3 || i == 9 { Plan::Pro } else { Plan::Free };
        queue.enqueue(job(plan), now, Duration::from_secs(60)).expect("enqueue succeeds");
    }

    let cancel = Notify::new();
    let mut pulled = Vec::with_capacity(12);
    for _ in 0..12 {
        let ticket = queue.pull_one("pdf", &cancel).await.expect("a ticket is always ready");
        pulled.push(ticket.job.plan);
    }

    assert_eq!(&pulled[..2], &[Plan::Pro, Plan::Pro]);
    assert!(pulled[2..].iter().all(|p| *p == Plan::Free));
}

/// Scenario 2 (`spec.md` §8): retry delays grow geometrically and their sum
/// matches the documented cumulative backoff schedule for the default
/// policy, with jitter held at zero for a deterministic assertion.
#[test]
fn retry_backoff_delays_follow_the_documented_cumulative_schedule() {
    let policy = RetryPolicy::defaults();
    let jitter = ZeroJitter;

    let delays: Vec<Duration> = (0..4).map(|attempt| policy.delay_for(attempt, &jitter)).collect();
    assert_eq!(delays, vec![
        Duration::from_secs(30),
        Duration::from_secs(90),
        Duration::from_secs(210),
        Duration::from_secs(450),
    ]);

    let cumulative: u64 = delays.iter().map(Duration::as_secs).sum();
    assert_eq!(cumulative, 780);
}

/// Scenario 3 (`spec.md` §8): a permanent failure parks the job in the DLQ
/// without consuming a retry, and replaying it re-enqueues a fresh job with
/// `attempt = 0` and a new job id.
#[tokio::test]
async fn permanent_failure_parks_in_the_dlq_and_replay_re_enqueues_a_fresh_job() {
    let ports = WorkerPorts {
        pdf_ops: Some(Arc::new(FakePdfOpsPort::always_fails_permanently())),
        ..WorkerPorts::default()
    };
    let (worker, harness) = spawn_worker(&["pdf"], ports);

    let mut params = BTreeMap::new();
    params.insert("operation".to_owned(), serde_json::json!("merge"));
    let job = Job::new(None, JobKind::PdfOp, Plan::Free, "user-4", JobPayload::new("in.pdf", params), Utc::now(), None);
    let job_id = job.job_id;
    harness.queue.enqueue(job, Utc::now(), Duration::from_secs(5)).expect("enqueue succeeds");

    let handles = worker.spawn();
    let snapshot = wait_for_terminal(&harness.status, job_id).await;
    worker.begin_shutdown();
    for handle in handles {
        handle.abort();
    }

    assert_eq!(snapshot.state, JobState::Failed);

    let parked = harness.dlq.list(JobKind::PdfOp, 10).await.expect("dlq list succeeds");
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].original_job.job_id, job_id);
    assert_eq!(parked[0].original_job.attempt, 0);

    let replayed = harness.dlq.replay(job_id).await.expect("replay succeeds");
    assert_eq!(replayed.attempt, 0);
    assert_ne!(replayed.job_id, job_id);
    assert!(harness.dlq.list(JobKind::PdfOp, 10).await.expect("dlq list succeeds").is_empty());
}

/// Scenario 5 (`spec.md` §8): a single-process pool restarts its process in
/// place once `conversions_done` crosses `max_conversions`, then again after
/// the same number of conversions post-restart (the "3rd, then 6th
/// conversion" boundary for `max_conversions = 2`).
#[tokio::test]
async fn pool_self_heals_at_the_max_conversions_boundary() {
    let launcher = Arc::new(FakeProcessLauncher::new());
    let pool = ProcessPool::start(
        PoolConfig { size: 1, max_conversions: 2, ..PoolConfig::default() },
        Arc::clone(&launcher) as Arc<dyn docflow::pool::ProcessLauncher>,
        Arc::new(FakeConversionPort::always_succeeds()),
        Arc::new(DefaultClock),
    )
    .await
    .expect("pool starts");

    assert_eq!(launcher.start_calls(), 1);
    let cancel = Notify::new();

    for _ in 0..3 {
        pool.convert("in", "out", &cancel).await.expect("conversion succeeds");
    }
    assert_eq!(launcher.start_calls(), 2, "process restarts after the 3rd conversion");

    for _ in 0..3 {
        pool.convert("in", "out", &cancel).await.expect("conversion succeeds");
    }
    assert_eq!(launcher.start_calls(), 3, "process restarts again after the 6th conversion");
}

/// Scenario 6 (`spec.md` §8): once protection mode engages, a subsequent
/// `enqueue` is rejected with `ResourceExhausted`; once it releases, the same
/// call succeeds again.
#[test]
fn enqueue_is_rejected_while_protection_mode_is_engaged() {
    let queue = JobQueue::new(&["pdf"], 20);
    let job = || Job::new(None, JobKind::PdfOp, Plan::Free, "user", JobPayload::new("in", BTreeMap::new()), Utc::now(), None);

    queue.set_protection_active(true);
    let err = queue.enqueue(job(), Utc::now(), Duration::from_secs(60)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

    queue.set_protection_active(false);
    queue.enqueue(job(), Utc::now(), Duration::from_secs(60)).expect("enqueue succeeds once released");
}
