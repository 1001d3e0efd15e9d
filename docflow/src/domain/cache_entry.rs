//! Cache entry and fingerprint types (`spec.md` §3, §4.A).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default maximum size of a single cache entry: 50 MiB (`spec.md` §6).
pub const MAX_CACHE_ENTRY_SIZE: u64 = 50 * 1024 * 1024;

/// Content-addressed cache key: `SHA-256(file_hash ‖ "|" ‖ operation ‖ "|" ‖ canonical_params_json)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap a raw 32-byte digest.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Full hex-encoded digest, used as the backing-store key.
    #[must_use]
    pub fn storage_key(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters, used as a short log identifier (`spec.md` §4.A).
    #[must_use]
    pub fn short_id(&self) -> String {
        hex::encode(self.0)[..16].to_owned()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short_id())
    }
}

/// Memoised artifact keyed by a [`Fingerprint`] (`spec.md` §3, §4.A).
///
/// ## Invariants
/// - An entry with `expires_at <= now` is treated as absent by readers.
/// - `size <= MAX_CACHE_ENTRY_SIZE` (enforced by [`crate::cache::CacheStore::set`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content-addressed key.
    pub fingerprint: Fingerprint,
    /// Where the cached artifact lives (file path or object store URI).
    pub artifact_locator: String,
    /// Free-form result metadata (e.g. page count, OCR confidence).
    pub result_meta: serde_json::Value,
    /// Size of the artifact in bytes.
    pub size: u64,
    /// When this entry was written.
    pub created_at: DateTime<Utc>,
    /// When this entry should be treated as absent.
    pub expires_at: DateTime<Utc>,
    /// Best-effort hit counter; writes back may fail silently.
    pub hit_count: u64,
}

impl CacheEntry {
    /// True if this entry should be treated as absent at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn short_id_is_prefix_of_storage_key() {
        let fp = Fingerprint::from_bytes([7u8; 32]);
        assert!(fp.storage_key().starts_with(&fp.short_id()));
        assert_eq!(fp.short_id().len(), 16);
        assert_eq!(fp.storage_key().len(), 64);
    }

    #[rstest]
    fn entry_at_exact_expiry_is_expired() {
        let now = Utc::now();
        let entry = CacheEntry {
            fingerprint: Fingerprint::from_bytes([0u8; 32]),
            artifact_locator: "x".into(),
            result_meta: serde_json::Value::Null,
            size: 10,
            created_at: now,
            expires_at: now,
            hit_count: 0,
        };
        assert!(entry.is_expired(now));
    }
}
