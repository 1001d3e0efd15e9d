//! Job queue and weighted dispatcher (`spec.md` §4.D).
//!
//! Purpose: hold named priority queues (`pdf`, `ocr`, `office`, `default`),
//! each a `BinaryHeap` ordered by `(not_before, priority, enqueued_seq)`
//! guarded by a narrowly scoped `parking_lot::Mutex`, and interleave
//! dispatch across the queues a server is bound to using a deficit
//! round-robin counter so no queue is starved.

mod single;
mod weighted;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::{Job, JobId, Ticket};
use crate::error::{Error, ErrorKind};

pub use weighted::WeightedPuller;

use single::SingleQueue;

/// Marker returned while a ticket is checked out by a worker.
struct ProcessingHandle {
    ticket: Ticket,
    cancel: Arc<Notify>,
    cancel_requested: std::sync::atomic::AtomicBool,
}

/// The shared job queue: one [`SingleQueue`] per queue name plus the set of
/// tickets currently checked out by workers.
pub struct JobQueue {
    queues: Mutex<HashMap<String, SingleQueue>>,
    processing: Mutex<HashMap<JobId, ProcessingHandle>>,
    enqueue_seq: AtomicU64,
    max_depth: usize,
    not_empty: Notify,
    protection_active: AtomicBool,
}

impl JobQueue {
    /// Build an empty queue set. `max_depth` is `Queue.Max` (`spec.md` §6),
    /// applied per named queue.
    #[must_use]
    pub fn new(queue_names: &[&str], max_depth: usize) -> Self {
        let mut queues = HashMap::new();
        for name in queue_names {
            queues.insert((*name).to_owned(), SingleQueue::new());
        }
        Self {
            queues: Mutex::new(queues),
            processing: Mutex::new(HashMap::new()),
            enqueue_seq: AtomicU64::new(0),
            max_depth,
            not_empty: Notify::new(),
            protection_active: AtomicBool::new(false),
        }
    }

    fn next_seq(&self) -> u64 {
        self.enqueue_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Set whether protection mode is currently engaged. Called by the
    /// health monitor on every engage/release transition (`spec.md` §4.G);
    /// only fresh [`JobQueue::enqueue`] calls are rejected while active, not
    /// internal retry requeues.
    pub fn set_protection_active(&self, active: bool) {
        self.protection_active.store(active, Ordering::SeqCst);
    }

    /// Whether protection mode is currently engaged, as last reported by the
    /// health monitor.
    #[must_use]
    pub fn is_protection_active(&self) -> bool {
        self.protection_active.load(Ordering::SeqCst)
    }

    /// Enqueue a fresh job onto its kind's primary queue, rejecting if
    /// protection mode is engaged or the queue is at `Queue.Max`
    /// (`spec.md` §4.D, §8 boundary).
    pub fn enqueue(&self, job: Job, not_before: DateTime<Utc>, timeout: Duration) -> Result<(), Error> {
        if self.is_protection_active() {
            return Err(Error::resource_exhausted(
                "protection mode is engaged; new jobs are rejected until it releases",
                Duration::from_secs(5),
            ));
        }
        let queue_name = job.kind.primary_queue().to_owned();
        let seq = self.next_seq();
        let ticket = Ticket::new(job, not_before, timeout, seq);
        self.enqueue_ticket(&queue_name, ticket)
    }

    /// Re-insert a ticket (typically after a transient failure) with a new
    /// `not_before`, preserving its original enqueue sequence for fairness.
    pub fn requeue(&self, mut ticket: Ticket, not_before: DateTime<Utc>) -> Result<(), Error> {
        ticket.not_before = not_before;
        let queue_name = ticket.job.kind.primary_queue().to_owned();
        self.enqueue_ticket(&queue_name, ticket)
    }

    fn enqueue_ticket(&self, queue_name: &str, ticket: Ticket) -> Result<(), Error> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| Error::validation(format!("unknown queue {queue_name}")))?;
        if queue.len() >= self.max_depth {
            return Err(Error::resource_exhausted(
                format!("queue {queue_name} is at capacity"),
                Duration::from_secs(5),
            ));
        }
        queue.push(ticket);
        drop(queues);
        self.not_empty.notify_waiters();
        Ok(())
    }

    /// Try to pop the earliest-eligible ticket from `queue_name` without
    /// blocking. Returns `None` if empty or nothing is yet eligible.
    fn try_pop_ready(&self, queue_name: &str, now: DateTime<Utc>) -> Option<Ticket> {
        let mut queues = self.queues.lock();
        queues.get_mut(queue_name).and_then(|q| q.pop_ready(now))
    }

    /// Depth of a named queue, for diagnostics and tests.
    #[must_use]
    pub fn depth(&self, queue_name: &str) -> usize {
        self.queues.lock().get(queue_name).map_or(0, SingleQueue::len)
    }

    /// Mark `ticket` as checked out by a worker, registering a cancellation
    /// handle for it.
    fn begin_processing(&self, ticket: Ticket) -> (Ticket, Arc<Notify>) {
        let cancel = Arc::new(Notify::new());
        let handle = ProcessingHandle {
            ticket: ticket.clone(),
            cancel: Arc::clone(&cancel),
            cancel_requested: std::sync::atomic::AtomicBool::new(false),
        };
        self.processing.lock().insert(ticket.job.job_id, handle);
        (ticket, cancel)
    }

    /// Report successful completion, releasing the processing slot.
    pub fn report_success(&self, job_id: JobId) {
        self.processing.lock().remove(&job_id);
    }

    /// Report a transient failure: release the processing slot and
    /// re-enqueue with the given `not_before` and an incremented attempt
    /// count (`spec.md` §4.D dispatch contract).
    pub fn report_retry(&self, job_id: JobId, not_before: DateTime<Utc>) -> Result<(), Error> {
        let mut handle = self
            .processing
            .lock()
            .remove(&job_id)
            .ok_or_else(|| Error::not_found(format!("job {job_id} is not processing")))?;
        handle.ticket.job = handle.ticket.job.next_attempt();
        self.requeue(handle.ticket, not_before)
    }

    /// Report a terminal failure or cancellation: release the processing
    /// slot without re-enqueueing (caller parks it in the DLQ separately).
    pub fn report_terminal(&self, job_id: JobId) {
        self.processing.lock().remove(&job_id);
    }

    /// Attempt to cancel `job_id`. Returns `true` if a pending ticket was
    /// removed, or a processing ticket was signalled; `false` if the job is
    /// unknown (`spec.md` §4.D cancellation).
    pub fn cancel(&self, job_id: JobId) -> bool {
        {
            let mut queues = self.queues.lock();
            for queue in queues.values_mut() {
                if queue.remove_by_job_id(job_id) {
                    return true;
                }
            }
        }
        let processing = self.processing.lock();
        if let Some(handle) = processing.get(&job_id) {
            handle.cancel_requested.store(true, Ordering::SeqCst);
            handle.cancel.notify_waiters();
            return true;
        }
        false
    }

    /// Whether cancellation has been requested for a checked-out job.
    #[must_use]
    pub fn is_cancel_requested(&self, job_id: JobId) -> bool {
        self.processing
            .lock()
            .get(&job_id)
            .is_some_and(|h| h.cancel_requested.load(Ordering::SeqCst))
    }

    /// Block until a ticket from one of `queue_name`s is eligible, or
    /// `cancel` fires. Does not apply weighting; see [`WeightedPuller`] for
    /// the weighted multi-queue dispatch contract.
    pub async fn pull_one(&self, queue_name: &str, cancel: &Notify) -> Option<Ticket> {
        loop {
            let now = Utc::now();
            if let Some(ticket) = self.try_pop_ready(queue_name, now) {
                let (ticket, _handle) = self.begin_processing(ticket);
                return Some(ticket);
            }
            tokio::select! {
                () = self.not_empty.notified() => {}
                () = tokio::time::sleep(Duration::from_millis(50)) => {}
                () = cancel.notified() => return None,
            }
        }
    }
}
