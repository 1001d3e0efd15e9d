//! Queue-internal ticket type (`spec.md` §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::Job;

/// The queue-internal handle tying a [`Job`] to its attempts.
///
/// ## Ownership
/// Exclusively owned by the queue until a worker acquires it; upon
/// acquisition the worker owns it until a terminal transition, at which
/// point ownership returns to the queue (retry) or the DLQ (terminal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// The job this ticket represents an attempt of.
    pub job: Job,
    /// Earliest eligible dispatch time.
    pub not_before: DateTime<Utc>,
    /// Maximum time a worker may hold this ticket before it is treated as timed out.
    pub timeout: Duration,
    /// How long a terminal ticket is retained in-memory for status queries.
    pub retention: Duration,
    /// Monotonically increasing enqueue sequence number, used to break ties FIFO.
    pub enqueued_seq: u64,
}

impl Ticket {
    /// Build a ticket for a fresh job at `not_before = job.created_at`.
    #[must_use]
    pub fn new(job: Job, not_before: DateTime<Utc>, timeout: Duration, enqueued_seq: u64) -> Self {
        Self {
            job,
            not_before,
            timeout,
            retention: Duration::from_secs(24 * 3600),
            enqueued_seq,
        }
    }

    /// The dispatch priority of the underlying job's plan (lower is earlier).
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.job.plan.priority()
    }
}

/// Ordering key used by the priority queue: `(not_before, priority, enqueued_seq)`.
///
/// Ties on `not_before` and `priority` break by FIFO enqueue order
/// (`spec.md` §4.D, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DispatchKey {
    not_before: DateTime<Utc>,
    priority: u8,
    enqueued_seq: u64,
}

impl DispatchKey {
    /// Derive the dispatch key from a ticket.
    #[must_use]
    pub fn from_ticket(ticket: &Ticket) -> Self {
        Self {
            not_before: ticket.not_before,
            priority: ticket.priority(),
            enqueued_seq: ticket.enqueued_seq,
        }
    }

    /// The key's dispatch eligibility time.
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn dispatch_key_orders_by_priority_then_fifo() {
        let now = Utc::now();
        let high = DispatchKey {
            not_before: now,
            priority: 1,
            enqueued_seq: 5,
        };
        let low_early = DispatchKey {
            not_before: now,
            priority: 10,
            enqueued_seq: 0,
        };
        let low_late = DispatchKey {
            not_before: now,
            priority: 10,
            enqueued_seq: 1,
        };
        assert!(high < low_early);
        assert!(low_early < low_late);
    }
}
