//! Dead-letter store (`spec.md` §4.C).
//!
//! Purpose: park terminally failed jobs for inspection or replay, layering
//! a small amount of structure (a record per `{kind, job_id}` plus a
//! job-id index) on top of the generic [`BackingStore`] port, rather than
//! assuming a relational schema.

use std::sync::Arc;

use mockable::Clock;
use thiserror::Error;

use crate::domain::{DlqRecord, Job, JobId, JobKind};
use crate::ports::{BackingStore, StoreError};

/// Errors raised by [`DlqStore`] operations.
#[derive(Debug, Error)]
pub enum DlqError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A stored record could not be decoded.
    #[error("dlq record could not be decoded: {message}")]
    Decode {
        /// Decode failure detail.
        message: String,
    },
    /// `replay` was called for a job id with no parked record.
    #[error("no parked record for job {job_id}")]
    NotFound {
        /// The job id that was looked up.
        job_id: JobId,
    },
}

fn kind_tag(kind: JobKind) -> &'static str {
    match kind {
        JobKind::PdfOp => "pdf-op",
        JobKind::OcrClassic => "ocr-classic",
        JobKind::OcrAi => "ocr-ai",
        JobKind::OfficeToPdf => "office-to-pdf",
    }
}

fn record_key(kind: JobKind, job_id: JobId) -> String {
    format!("dlq:record:{}:{job_id}", kind_tag(kind))
}

fn record_prefix(kind: JobKind) -> String {
    format!("dlq:record:{}:", kind_tag(kind))
}

fn job_index_key(job_id: JobId) -> String {
    format!("dlq:byjob:{job_id}")
}

/// Dead-letter store backed by a [`BackingStore`].
pub struct DlqStore {
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
}

impl DlqStore {
    /// Build a store over `store`, using `clock` for purge age calculations.
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Park a terminally failed job.
    pub async fn park(&self, record: DlqRecord) -> Result<(), DlqError> {
        let kind = record.original_job.kind;
        let job_id = record.original_job.job_id;
        let encoded = serde_json::to_vec(&record).map_err(|e| DlqError::Decode { message: e.to_string() })?;
        self.store.set(&record_key(kind, job_id), encoded, None).await?;
        self.store
            .set(&job_index_key(job_id), kind_tag(kind).as_bytes().to_vec(), None)
            .await?;
        Ok(())
    }

    /// List up to `limit` parked records for `kind`, most recently failed first.
    pub async fn list(&self, kind: JobKind, limit: usize) -> Result<Vec<DlqRecord>, DlqError> {
        let keys = self.store.scan(&record_prefix(kind)).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.store.get(&key).await? {
                let record: DlqRecord =
                    serde_json::from_slice(&raw).map_err(|e| DlqError::Decode { message: e.to_string() })?;
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        records.truncate(limit);
        Ok(records)
    }

    /// Re-enqueue the original job as a fresh ticket with `attempt = 0`,
    /// removing the parked record.
    pub async fn replay(&self, job_id: JobId) -> Result<Job, DlqError> {
        let Some(kind_raw) = self.store.get(&job_index_key(job_id)).await? else {
            return Err(DlqError::NotFound { job_id });
        };
        let kind_tag = String::from_utf8_lossy(&kind_raw).into_owned();
        let kind = [JobKind::PdfOp, JobKind::OcrClassic, JobKind::OcrAi, JobKind::OfficeToPdf]
            .into_iter()
            .find(|k| self::kind_tag(*k) == kind_tag)
            .ok_or(DlqError::NotFound { job_id })?;

        let key = record_key(kind, job_id);
        let raw = self.store.get(&key).await?.ok_or(DlqError::NotFound { job_id })?;
        let record: DlqRecord = serde_json::from_slice(&raw).map_err(|e| DlqError::Decode { message: e.to_string() })?;

        self.store.del(&key).await?;
        self.store.del(&job_index_key(job_id)).await?;

        Ok(record.original_job.as_replay())
    }

    /// Remove records older than `older_than`. Returns the number purged.
    pub async fn purge(&self, older_than: chrono::Duration) -> Result<u64, DlqError> {
        let now = self.clock.utc();
        let keys = self.store.scan("dlq:record:").await?;
        let mut purged = 0u64;
        for key in keys {
            let Some(raw) = self.store.get(&key).await? else { continue };
            let record: DlqRecord =
                serde_json::from_slice(&raw).map_err(|e| DlqError::Decode { message: e.to_string() })?;
            if record.is_purgeable(now, older_than) {
                self.store.del(&key).await?;
                self.store.del(&job_index_key(record.original_job.job_id)).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobPayload, Plan};
    use crate::outbound::memory::MemoryStore;
    use mockable::DefaultClock;
    use std::collections::BTreeMap;

    fn new_store() -> DlqStore {
        DlqStore::new(Arc::new(MemoryStore::new()), Arc::new(DefaultClock))
    }

    fn sample_job() -> Job {
        Job::new(
            None,
            JobKind::OcrAi,
            Plan::Free,
            "user-1",
            JobPayload::new("in.png", BTreeMap::new()),
            chrono::Utc::now(),
            None,
        )
    }

    #[tokio::test]
    async fn park_then_list_returns_the_record() {
        let store = new_store();
        let job = sample_job();
        let job_id = job.job_id;
        store.park(DlqRecord::new(job, "boom", chrono::Utc::now())).await.unwrap();

        let records = store.list(JobKind::OcrAi, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_job.job_id, job_id);
    }

    #[tokio::test]
    async fn replay_resets_attempt_and_removes_the_record() {
        let store = new_store();
        let job = sample_job().next_attempt().next_attempt();
        let job_id = job.job_id;
        store.park(DlqRecord::new(job, "boom", chrono::Utc::now())).await.unwrap();

        let replayed = store.replay(job_id).await.unwrap();
        assert_eq!(replayed.attempt, 0);
        assert_ne!(replayed.job_id, job_id);

        let err = store.replay(job_id).await.unwrap_err();
        assert!(matches!(err, DlqError::NotFound { .. }));
    }

    #[tokio::test]
    async fn purge_removes_only_old_enough_records() {
        let store = new_store();
        let now = chrono::Utc::now();
        let old_job = sample_job();
        let old_job_id = old_job.job_id;
        store
            .park(DlqRecord::new(old_job, "boom", now - chrono::Duration::days(10)))
            .await
            .unwrap();
        let fresh_job = sample_job();
        store.park(DlqRecord::new(fresh_job, "boom", now)).await.unwrap();

        let purged = store.purge(chrono::Duration::days(7)).await.unwrap();
        assert_eq!(purged, 1);

        let err = store.replay(old_job_id).await.unwrap_err();
        assert!(matches!(err, DlqError::NotFound { .. }));
    }
}
