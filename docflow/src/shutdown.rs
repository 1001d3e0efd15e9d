//! Graceful shutdown coordination (`spec.md` §4.F, §6 exit codes).
//!
//! Purpose: on `SIGINT`/`SIGTERM`/`SIGQUIT`, stop every worker lane from
//! pulling new tickets, give in-flight work a bounded drain period, then
//! abort anything still running — the corpus's own `tokio::select!` +
//! cancellation-notify idiom applied to process-level shutdown rather than a
//! cancellation-token crate.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::worker::Worker;

/// Outcome of a shutdown sequence, mapped to the process exit code at the
/// binary's call site (`spec.md` §6: non-zero indicates shutdown failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every worker lane stopped within its drain period.
    Clean,
    /// At least one worker lane had to be aborted after the drain deadline.
    Forced,
}

impl ShutdownOutcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Forced => 1,
        }
    }
}

/// Wait for `SIGINT`, `SIGTERM`, or `SIGQUIT`, whichever arrives first, and
/// return its name for logging.
///
/// # Errors
///
/// Returns an error if a signal handler fails to install (e.g. the process
/// lacks permission to register one).
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    Ok(tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    })
}

/// Stop every worker from pulling new tickets, wait up to `drain_timeout`
/// for its spawned lanes to finish in-flight work, then abort stragglers.
/// `monitor_handles` (the health monitor's interval loops) are aborted
/// unconditionally once the worker drain completes, since they have no
/// drainable in-flight work of their own.
pub async fn shutdown(
    workers: &[Arc<Worker>],
    worker_handles: Vec<JoinHandle<()>>,
    monitor_handles: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
) -> ShutdownOutcome {
    for worker in workers {
        worker.begin_shutdown();
    }

    let forced_any = join_all(worker_handles.into_iter().map(|mut handle| async move {
        match tokio::time::timeout(drain_timeout, &mut handle).await {
            Ok(_) => false,
            Err(_) => {
                handle.abort();
                true
            }
        }
    }))
    .await
    .into_iter()
    .any(|forced| forced);

    for handle in monitor_handles {
        handle.abort();
    }

    let outcome = if forced_any { ShutdownOutcome::Forced } else { ShutdownOutcome::Clean };
    match outcome {
        ShutdownOutcome::Clean => info!("shutdown complete: all worker lanes drained cleanly"),
        ShutdownOutcome::Forced => warn!("shutdown complete: one or more worker lanes were aborted after the drain deadline"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::WorkerRegistry;
    use crate::outbound::memory::MemoryStore;
    use crate::outbound::metrics::NullMetrics;
    use crate::queue::JobQueue;
    use crate::worker::{WorkerConfig, WorkerPorts};
    use mockable::DefaultClock;

    fn idle_worker() -> Arc<Worker> {
        let queue = Arc::new(JobQueue::new(&["pdf"], 100));
        let store: Arc<dyn crate::ports::BackingStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(DefaultClock);
        Arc::new(Worker::new(
            WorkerConfig { name: "w1".to_owned(), concurrency: 1, drain_timeout: Duration::from_millis(50) },
            Arc::clone(&queue),
            vec![("pdf".to_owned(), 1)],
            WorkerPorts { pool: None, ocr_classic: None, ocr_ai: None, pdf_ops: None },
            Arc::new(crate::cache::CacheStore::new(Arc::clone(&store), Arc::clone(&clock), Duration::from_secs(60))),
            Arc::new(crate::status::StatusStore::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Duration::from_secs(24 * 60 * 60),
                Duration::from_secs(24 * 60 * 60),
            )),
            Arc::new(crate::dlq::DlqStore::new(Arc::clone(&store), Arc::clone(&clock))),
            Arc::new(NullMetrics),
            docflow_backoff::RetryPolicy::defaults(),
            Box::new(docflow_backoff::ZeroJitter),
            clock,
            None,
            None,
        ))
    }

    #[tokio::test]
    async fn shutdown_with_idle_workers_drains_cleanly() {
        let worker = idle_worker();
        let handles = worker.spawn();

        let outcome = shutdown(&[Arc::clone(&worker)], handles, vec![], Duration::from_secs(1)).await;

        assert_eq!(outcome, ShutdownOutcome::Clean);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn forced_outcome_maps_to_nonzero_exit_code() {
        assert_eq!(ShutdownOutcome::Forced.exit_code(), 1);
    }

    #[tokio::test]
    async fn health_monitor_tasks_are_aborted_alongside_worker_drain() {
        let sampler: Arc<dyn crate::ports::SystemSamplerPort> = Arc::new(crate::outbound::sampler::SysinfoSampler::new(std::env::temp_dir()));
        let store: Arc<dyn crate::ports::BackingStore> = Arc::new(MemoryStore::new());
        let queue = Arc::new(JobQueue::new(&["pdf"], 100));
        let monitor = Arc::new(crate::health::HealthMonitor::new(
            crate::health::Thresholds::default(),
            crate::health::MonitorIntervals::default(),
            sampler,
            store,
            queue,
            vec!["pdf".to_owned()],
            Arc::new(WorkerRegistry::new()),
            Arc::new(DefaultClock),
            crate::health::ProtectionHooks::default(),
        ));
        let monitor_handles = monitor.spawn();

        let worker = idle_worker();
        let worker_handles = worker.spawn();

        let outcome = shutdown(&[worker], worker_handles, monitor_handles, Duration::from_millis(200)).await;
        assert_eq!(outcome, ShutdownOutcome::Clean);
    }
}
