//! A single named queue: a `BinaryHeap` ordered by `(not_before, priority,
//! enqueued_seq)`, wrapped so only eligible tickets (`not_before <= now`)
//! are ever popped.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::domain::{DispatchKey, JobId, Ticket};

pub(super) struct HeapItem {
    key: DispatchKey,
    ticket: Ticket,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// One named queue's storage: a min-heap (via `Reverse`) so the earliest
/// `(not_before, priority, enqueued_seq)` ticket is always at the top.
pub(super) struct SingleQueue {
    heap: BinaryHeap<Reverse<HeapItem>>,
}

impl SingleQueue {
    pub(super) fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub(super) fn push(&mut self, ticket: Ticket) {
        let key = DispatchKey::from_ticket(&ticket);
        self.heap.push(Reverse(HeapItem { key, ticket }));
    }

    pub(super) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Pop the earliest ticket if it is eligible (`not_before <= now`).
    /// Leaves the heap untouched if the earliest ticket is not yet due.
    pub(super) fn pop_ready(&mut self, now: DateTime<Utc>) -> Option<Ticket> {
        let is_ready = self.heap.peek().is_some_and(|Reverse(item)| item.key.not_before() <= now);
        if is_ready {
            self.heap.pop().map(|Reverse(item)| item.ticket)
        } else {
            None
        }
    }

    /// Remove a pending ticket by job id. Returns whether one was found.
    pub(super) fn remove_by_job_id(&mut self, job_id: JobId) -> bool {
        let items: Vec<HeapItem> = std::mem::take(&mut self.heap).into_vec().into_iter().map(|Reverse(i)| i).collect();
        let mut found = false;
        for item in items {
            if item.ticket.job.job_id == job_id {
                found = true;
            } else {
                self.heap.push(Reverse(item));
            }
        }
        found
    }
}
