//! Content-addressed result cache (`spec.md` §4.A).
//!
//! Purpose: memoise conversion/OCR/PDF-op outputs behind a fingerprint
//! derived from the input file hash, operation name, and canonicalised
//! parameters, so identical requests are served without re-running the
//! underlying engine.
//!
//! Public surface: [`CacheStore`], [`CacheStats`], [`CacheError`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::cache_entry::MAX_CACHE_ENTRY_SIZE;
use crate::domain::{CacheEntry, Fingerprint};
use crate::ports::{BackingStore, StoreError};

/// Errors raised by [`CacheStore`] operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The artifact exceeds the configured maximum entry size.
    #[error("cache entry of {size} bytes exceeds the {max} byte limit")]
    EntryTooLarge {
        /// Size of the rejected artifact.
        size: u64,
        /// Configured maximum.
        max: u64,
    },
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A stored value could not be decoded.
    #[error("cache entry could not be decoded: {message}")]
    Decode {
        /// Decode failure detail.
        message: String,
    },
}

/// Process-local hit/miss counters (`spec.md` §4.A).
///
/// These are not the [`crate::ports::MetricsPort`] — they are a cheap,
/// always-available summary queryable without a metrics backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Successful lookups of a live entry.
    pub hits: u64,
    /// Lookups that found nothing, or a stale entry.
    pub misses: u64,
}

fn entry_key(fingerprint: &Fingerprint) -> String {
    format!("cache:entry:{}", fingerprint.storage_key())
}

fn file_index_key(file_hash: &str, fingerprint: &Fingerprint) -> String {
    format!("cache:idx:file:{file_hash}:{}", fingerprint.storage_key())
}

fn file_index_prefix(file_hash: &str) -> String {
    format!("cache:idx:file:{file_hash}:")
}

fn operation_index_key(operation: &str, fingerprint: &Fingerprint) -> String {
    format!("cache:idx:op:{operation}:{}", fingerprint.storage_key())
}

fn operation_index_prefix(operation: &str) -> String {
    format!("cache:idx:op:{operation}:")
}

/// Derive the content-addressed fingerprint for a request.
///
/// `params` is canonicalised by virtue of being a [`BTreeMap`]: `serde_json`
/// serialises its entries in key order, so two maps equal as unordered
/// key/value sets always serialise identically (`spec.md` §8 fingerprint
/// determinism law).
#[must_use]
pub fn fingerprint(file_hash: &str, operation: &str, params: &BTreeMap<String, Value>) -> Fingerprint {
    let canonical_params = serde_json::to_string(params).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(file_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(operation.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_params.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    Fingerprint::from_bytes(digest)
}

/// Content-addressed result cache backed by a [`BackingStore`].
pub struct CacheStore {
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    max_entry_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    /// Build a cache store with the given defaults (`spec.md` §6:
    /// `cache.default_ttl`, `cache.max_entry_bytes`).
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>, clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            default_ttl,
            max_entry_bytes: MAX_CACHE_ENTRY_SIZE,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Override the maximum artifact size accepted by [`Self::set`].
    #[must_use]
    pub fn with_max_entry_bytes(mut self, max_entry_bytes: u64) -> Self {
        self.max_entry_bytes = max_entry_bytes;
        self
    }

    /// Look up a cached entry, treating an expired entry as a miss and
    /// lazily deleting it (`spec.md` §4.A, §8 invariant).
    pub async fn get(
        &self,
        file_hash: &str,
        operation: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let fp = fingerprint(file_hash, operation, params);
        let Some(raw) = self.store.get(&entry_key(&fp)).await? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        let mut entry: CacheEntry = serde_json::from_slice(&raw).map_err(|e| CacheError::Decode {
            message: e.to_string(),
        })?;
        let now = self.clock.utc();
        if entry.is_expired(now) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            let _ = self.store.del(&entry_key(&fp)).await;
            return Ok(None);
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        entry.hit_count += 1;
        if let Ok(encoded) = serde_json::to_vec(&entry) {
            let ttl = (entry.expires_at - now).to_std().ok();
            let _ = self.store.set(&entry_key(&fp), encoded, ttl).await;
        }
        Ok(Some(entry))
    }

    /// Store a fresh entry, refusing artifacts over the configured size
    /// limit (`spec.md` §4.A invariant).
    pub async fn set(
        &self,
        file_hash: &str,
        operation: &str,
        params: &BTreeMap<String, Value>,
        artifact_locator: impl Into<String>,
        result_meta: Value,
        size: u64,
    ) -> Result<Fingerprint, CacheError> {
        if size > self.max_entry_bytes {
            return Err(CacheError::EntryTooLarge {
                size,
                max: self.max_entry_bytes,
            });
        }
        let fp = fingerprint(file_hash, operation, params);
        let now = self.clock.utc();
        let expires_at = now + chrono::Duration::from_std(self.default_ttl).unwrap_or_default();
        let entry = CacheEntry {
            fingerprint: fp,
            artifact_locator: artifact_locator.into(),
            result_meta,
            size,
            created_at: now,
            expires_at,
            hit_count: 0,
        };
        let encoded = serde_json::to_vec(&entry).map_err(|e| CacheError::Decode {
            message: e.to_string(),
        })?;
        self.store.set(&entry_key(&fp), encoded, Some(self.default_ttl)).await?;
        self.store
            .set(&file_index_key(file_hash, &fp), Vec::new(), Some(self.default_ttl))
            .await?;
        self.store
            .set(&operation_index_key(operation, &fp), Vec::new(), Some(self.default_ttl))
            .await?;
        Ok(fp)
    }

    /// Delete a single entry by its request identity.
    pub async fn delete(
        &self,
        file_hash: &str,
        operation: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<(), CacheError> {
        let fp = fingerprint(file_hash, operation, params);
        self.store.del(&entry_key(&fp)).await?;
        self.store.del(&file_index_key(file_hash, &fp)).await?;
        self.store.del(&operation_index_key(operation, &fp)).await?;
        Ok(())
    }

    /// Invalidate every entry derived from `file_hash`, regardless of
    /// operation. Returns the number of entries removed.
    pub async fn invalidate_by_file(&self, file_hash: &str) -> Result<u64, CacheError> {
        let prefix = file_index_prefix(file_hash);
        let markers = self.store.scan(&prefix).await?;
        let mut removed = 0u64;
        for marker in markers {
            if let Some(storage_key) = marker.strip_prefix(&prefix) {
                let _ = self.store.del(&format!("cache:entry:{storage_key}")).await;
            }
            let _ = self.store.del(&marker).await;
            removed += 1;
        }
        Ok(removed)
    }

    /// Invalidate every entry derived from `operation`, regardless of file.
    /// Returns the number of entries removed.
    pub async fn invalidate_by_operation(&self, operation: &str) -> Result<u64, CacheError> {
        let prefix = operation_index_prefix(operation);
        let markers = self.store.scan(&prefix).await?;
        let mut removed = 0u64;
        for marker in markers {
            if let Some(storage_key) = marker.strip_prefix(&prefix) {
                let _ = self.store.del(&format!("cache:entry:{storage_key}")).await;
            }
            let _ = self.store.del(&marker).await;
            removed += 1;
        }
        Ok(removed)
    }

    /// Current hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
