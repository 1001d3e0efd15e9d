//! Dead-letter record type (`spec.md` §3, §4.C).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Job;

/// Minimum retention for parked records before they become eligible for purge.
pub const MIN_RETENTION_DAYS: i64 = 7;

/// A terminally failed job parked for later inspection or replay.
///
/// Records are keyed by `{kind, job_id, failed_at}` in the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqRecord {
    /// The job as it stood at the moment it was parked.
    pub original_job: Job,
    /// The final error kind and message, stringified for storage.
    pub last_error: String,
    /// Total attempts made before parking.
    pub attempts: u32,
    /// When this record was parked.
    pub failed_at: DateTime<Utc>,
}

impl DlqRecord {
    /// Build a record from a terminally failed job.
    #[must_use]
    pub fn new(original_job: Job, last_error: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        let attempts = original_job.attempt.saturating_add(1);
        Self {
            original_job,
            last_error: last_error.into(),
            attempts,
            failed_at,
        }
    }

    /// Whether this record is older than `older_than` relative to `now`, and
    /// therefore eligible for purge.
    #[must_use]
    pub fn is_purgeable(&self, now: DateTime<Utc>, older_than: chrono::Duration) -> bool {
        now - self.failed_at >= older_than
    }
}
