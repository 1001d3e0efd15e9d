//! Weighted interleave across a server's bound queues (`spec.md` §4.D).
//!
//! A server binds to a subset of queues with a weight map (e.g.
//! `{ocr: 6, default: 4}`); over a large sample of dispatched tickets the
//! fraction of work from queue `q` tends to `weight(q) / sum(weights)`.
//! Strict priority across queues is deliberately not used so low-weight
//! queues are never starved; a deficit round-robin counter gives this
//! property without reasoning about floating-point drift.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::JobQueue;
use crate::domain::Ticket;

struct DeficitState {
    order: Vec<(String, u32)>,
    deficits: Vec<i64>,
    cursor: usize,
}

/// Interleaves dispatch across a bound set of `(queue, weight)` pairs using
/// deficit round-robin.
pub struct WeightedPuller {
    queue: Arc<JobQueue>,
    state: Mutex<DeficitState>,
}

impl WeightedPuller {
    /// Bind to `weights` (queue name, relative weight), e.g.
    /// `[("ocr", 6), ("default", 4)]`.
    #[must_use]
    pub fn new(queue: Arc<JobQueue>, weights: Vec<(String, u32)>) -> Self {
        let deficits = vec![0; weights.len()];
        Self {
            queue,
            state: Mutex::new(DeficitState { order: weights, cursor: 0, deficits }),
        }
    }

    /// Try every bound queue once, in deficit order, for a ticket eligible
    /// right now. Returns `None` if nothing is eligible anywhere.
    fn try_pull_ready(&self) -> Option<Ticket> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let n = state.order.len();
        if n == 0 {
            return None;
        }
        for _ in 0..n {
            let idx = state.cursor;
            state.cursor = (state.cursor + 1) % n;
            let (name, weight) = state.order[idx].clone();
            state.deficits[idx] += i64::from(weight);
            if state.deficits[idx] <= 0 {
                continue;
            }
            if let Some(ticket) = self.queue.try_pop_ready(&name, now) {
                state.deficits[idx] -= 1;
                let (ticket, _handle) = self.queue.begin_processing(ticket);
                return Some(ticket);
            }
        }
        None
    }

    /// Block until a ticket is eligible from one of this puller's bound
    /// queues, or `cancel` fires.
    pub async fn next(&self, cancel: &Notify) -> Option<Ticket> {
        loop {
            if let Some(ticket) = self.try_pull_ready() {
                return Some(ticket);
            }
            tokio::select! {
                () = self.queue.not_empty.notified() => {}
                () = tokio::time::sleep(Duration::from_millis(50)) => {}
                () = cancel.notified() => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobKind, JobPayload, Plan};
    use std::collections::BTreeMap;

    fn job(kind: JobKind) -> Job {
        Job::new(None, kind, Plan::Free, "user", JobPayload::new("in", BTreeMap::new()), Utc::now(), None)
    }

    #[tokio::test]
    async fn weighted_dispatch_approximates_weight_ratio() {
        let queue = Arc::new(JobQueue::new(&["ocr", "default"], 1000));
        for _ in 0..60 {
            queue.enqueue(job(JobKind::OcrClassic), Utc::now(), Duration::from_secs(60)).unwrap();
        }
        for _ in 0..60 {
            queue.enqueue(job(JobKind::PdfOp), Utc::now(), Duration::from_secs(60)).unwrap();
        }
        // `default` isn't a kind's primary queue; requeue pdf tickets under "default" directly via a second puller weight test instead.
        let puller = WeightedPuller::new(Arc::clone(&queue), vec![("ocr".to_owned(), 6), ("pdf".to_owned(), 4)]);
        let cancel = Notify::new();
        let mut ocr_count = 0;
        let mut pdf_count = 0;
        for _ in 0..100 {
            match puller.next(&cancel).await {
                Some(ticket) if ticket.job.kind == JobKind::OcrClassic => ocr_count += 1,
                Some(_) => pdf_count += 1,
                None => break,
            }
        }
        assert_eq!(ocr_count, 60);
        assert_eq!(pdf_count, 40);
    }
}
