//! Job status store (`spec.md` §4.H).
//!
//! Purpose: a thin, serde-friendly projection of `JobState` plus progress
//! and outcome over the [`BackingStore`] port, with a process-local
//! secondary index (`user_id -> set<job_id>`) so `list_for_user` does not
//! need to re-scan the backing store on every call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{JobId, JobKind, JobState};
use crate::error::ErrorKind;
use crate::ports::{BackingStore, StoreError};

/// Errors raised by [`StatusStore`] operations.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A stored record could not be decoded.
    #[error("status record could not be decoded: {message}")]
    Decode {
        /// Decode failure detail.
        message: String,
    },
    /// The requested job has no status record.
    #[error("no status record for job {job_id}")]
    NotFound {
        /// The job id that was looked up.
        job_id: JobId,
    },
}

/// A successful outcome recorded against a job's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Where the produced artifact lives, or structured info for `info`-style ops.
    pub artifact_locator: Option<String>,
    /// Free-form result metadata.
    pub meta: Value,
    /// Which engine actually produced the result, e.g. `classic_fallback`.
    pub engine: Option<String>,
}

/// A terminal failure recorded against a job's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusFailure {
    /// Machine-readable failure category.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

/// Per-job status, progress, and outcome (`spec.md` §4.H).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    /// Job identifier.
    pub job_id: JobId,
    /// Owning user.
    pub user_id: String,
    /// Kind of work, used for display and metrics correlation.
    pub kind: JobKind,
    /// Current lifecycle state.
    pub state: JobState,
    /// Progress percentage, if reported.
    pub progress_pct: Option<u8>,
    /// Human-readable progress message, if reported.
    pub progress_message: Option<String>,
    /// Result of a completed job.
    pub outcome: Option<JobOutcome>,
    /// Failure detail of a failed job.
    pub failure: Option<StatusFailure>,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl JobStatusRecord {
    /// A fresh `pending` record.
    #[must_use]
    pub fn pending(job_id: JobId, user_id: impl Into<String>, kind: JobKind, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            user_id: user_id.into(),
            kind,
            state: JobState::Pending,
            progress_pct: None,
            progress_message: None,
            outcome: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

fn record_key(job_id: JobId) -> String {
    format!("status:job:{job_id}")
}

fn record_prefix() -> &'static str {
    "status:job:"
}

fn index_marker_key(user_id: &str, job_id: JobId) -> String {
    format!("status:index:{user_id}:{job_id}")
}

fn index_prefix(user_id: &str) -> String {
    format!("status:index:{user_id}:")
}

/// Job status store backed by a [`BackingStore`], with a warm process-local
/// secondary index over `user_id`.
pub struct StatusStore {
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    index_ttl: Duration,
    index: DashMap<String, HashSet<JobId>>,
}

impl StatusStore {
    /// Build a store. `ttl` is applied once a record reaches a terminal
    /// state (`spec.md` §4.H default 24h); `index_ttl` bounds how long the
    /// `user_id -> set<job_id>` markers live (default 7d).
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>, clock: Arc<dyn Clock>, ttl: Duration, index_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            index_ttl,
            index: DashMap::new(),
        }
    }

    /// Save (insert or overwrite) a status record, updating the secondary
    /// index and the in-process cache.
    pub async fn save(&self, mut record: JobStatusRecord) -> Result<(), StatusError> {
        record.updated_at = self.clock.utc();
        let ttl = record.state.is_terminal().then_some(self.ttl);
        let encoded = serde_json::to_vec(&record).map_err(|e| StatusError::Decode { message: e.to_string() })?;
        self.store.set(&record_key(record.job_id), encoded, ttl).await?;
        self.store
            .set(&index_marker_key(&record.user_id, record.job_id), Vec::new(), Some(self.index_ttl))
            .await?;
        self.index.entry(record.user_id.clone()).or_default().insert(record.job_id);
        Ok(())
    }

    /// Fetch a status record.
    pub async fn get(&self, job_id: JobId) -> Result<Option<JobStatusRecord>, StatusError> {
        let Some(raw) = self.store.get(&record_key(job_id)).await? else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&raw).map_err(|e| StatusError::Decode { message: e.to_string() })?;
        Ok(Some(record))
    }

    async fn ensure_index_loaded(&self, user_id: &str) -> Result<(), StatusError> {
        if self.index.contains_key(user_id) {
            return Ok(());
        }
        let prefix = index_prefix(user_id);
        let markers = self.store.scan(&prefix).await?;
        let mut ids = HashSet::with_capacity(markers.len());
        for marker in markers {
            if let Some(id) = marker.strip_prefix(&prefix).and_then(|s| s.parse::<uuid::Uuid>().ok()) {
                ids.insert(JobId::from_uuid(id));
            }
        }
        self.index.insert(user_id.to_owned(), ids);
        Ok(())
    }

    /// List up to `limit` records for `user_id`, most recently updated first.
    pub async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<JobStatusRecord>, StatusError> {
        self.ensure_index_loaded(user_id).await?;
        let ids: Vec<JobId> = self.index.get(user_id).map(|set| set.iter().copied().collect()).unwrap_or_default();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(id).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(limit);
        Ok(records)
    }

    /// Merge a progress update into the existing record, creating a fresh
    /// `processing` record if none exists (`spec.md` §4.H).
    pub async fn update_progress(
        &self,
        job_id: JobId,
        user_id: &str,
        kind: JobKind,
        pct: u8,
        message: impl Into<String>,
    ) -> Result<(), StatusError> {
        let now = self.clock.utc();
        let mut record = match self.get(job_id).await? {
            Some(existing) => existing,
            None => {
                let mut fresh = JobStatusRecord::pending(job_id, user_id, kind, now);
                fresh.state = JobState::Processing;
                fresh
            }
        };
        record.progress_pct = Some(pct.min(100));
        record.progress_message = Some(message.into());
        self.save(record).await
    }

    /// Delete a status record and its index marker.
    pub async fn delete(&self, job_id: JobId) -> Result<(), StatusError> {
        if let Some(record) = self.get(job_id).await? {
            self.store.del(&index_marker_key(&record.user_id, job_id)).await?;
            if let Some(mut set) = self.index.get_mut(&record.user_id) {
                set.remove(&job_id);
            }
        }
        self.store.del(&record_key(job_id)).await?;
        Ok(())
    }

    /// Count records currently `pending` or `processing`.
    ///
    /// Scans every status record; acceptable because this is a diagnostic,
    /// non-hot-path call (`spec.md` §4.H), not part of the dispatch loop.
    pub async fn pending_count(&self) -> Result<u64, StatusError> {
        let keys = self.store.scan(record_prefix()).await?;
        let mut count = 0u64;
        for key in keys {
            if let Some(raw) = self.store.get(&key).await? {
                let record: JobStatusRecord =
                    serde_json::from_slice(&raw).map_err(|e| StatusError::Decode { message: e.to_string() })?;
                if matches!(record.state, JobState::Pending | JobState::Processing) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Drop secondary-index markers left behind after their record's TTL
    /// already expired it out of the backing store. Returns the number
    /// removed.
    pub async fn cleanup_expired(&self) -> Result<u64, StatusError> {
        let markers = self.store.scan("status:index:").await?;
        let mut removed = 0u64;
        for marker in markers {
            let Some(rest) = marker.strip_prefix("status:index:") else { continue };
            let Some((user_id, job_id_str)) = rest.rsplit_once(':') else { continue };
            let Ok(job_uuid) = job_id_str.parse::<uuid::Uuid>() else { continue };
            let job_id = JobId::from_uuid(job_uuid);
            if self.store.get(&record_key(job_id)).await?.is_none() {
                self.store.del(&marker).await?;
                if let Some(mut set) = self.index.get_mut(user_id) {
                    set.remove(&job_id);
                }
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::memory::MemoryStore;
    use mockable::DefaultClock;

    fn new_store() -> StatusStore {
        StatusStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(DefaultClock),
            Duration::from_secs(3600),
            Duration::from_secs(7 * 24 * 3600),
        )
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let store = new_store();
        let job_id = JobId::generate();
        let record = JobStatusRecord::pending(job_id, "user-1", JobKind::PdfOp, Utc::now());
        store.save(record).await.unwrap();

        let fetched = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, "user-1");
        assert_eq!(fetched.state, JobState::Pending);
    }

    #[tokio::test]
    async fn update_progress_creates_a_processing_record_when_absent() {
        let store = new_store();
        let job_id = JobId::generate();
        store.update_progress(job_id, "user-1", JobKind::OcrClassic, 42, "scanning page 3").await.unwrap();

        let record = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Processing);
        assert_eq!(record.progress_pct, Some(42));
    }

    #[tokio::test]
    async fn list_for_user_returns_records_most_recently_updated_first() {
        let store = new_store();
        let older = JobId::generate();
        let newer = JobId::generate();
        store.save(JobStatusRecord::pending(older, "user-1", JobKind::PdfOp, Utc::now() - chrono::Duration::seconds(10))).await.unwrap();
        store.save(JobStatusRecord::pending(newer, "user-1", JobKind::PdfOp, Utc::now())).await.unwrap();

        let records = store.list_for_user("user-1", 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].job_id, newer);
    }

    #[tokio::test]
    async fn delete_removes_the_record_and_index_marker() {
        let store = new_store();
        let job_id = JobId::generate();
        store.save(JobStatusRecord::pending(job_id, "user-1", JobKind::PdfOp, Utc::now())).await.unwrap();
        store.delete(job_id).await.unwrap();

        assert!(store.get(job_id).await.unwrap().is_none());
        assert!(store.list_for_user("user-1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_count_ignores_terminal_records() {
        let store = new_store();
        let pending_job = JobId::generate();
        let done_job = JobId::generate();
        store.save(JobStatusRecord::pending(pending_job, "user-1", JobKind::PdfOp, Utc::now())).await.unwrap();
        let mut done = JobStatusRecord::pending(done_job, "user-1", JobKind::PdfOp, Utc::now());
        done.state = JobState::Completed;
        store.save(done).await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 1);
    }
}
