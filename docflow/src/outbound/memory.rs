//! In-memory [`BackingStore`] implementation (`spec.md` §6).
//!
//! Backs local development and the integration test suite. A background
//! sweeper periodically evicts expired entries so long-running tests don't
//! accumulate garbage; reads also check expiry lazily so correctness never
//! depends on the sweeper's cadence.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::ports::{BackingStore, StoreError};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Default)]
struct Inner {
    values: DashMap<String, StoredValue>,
    lists: DashMap<String, VecDeque<Vec<u8>>>,
}

/// `dashmap`-backed [`BackingStore`] with lazy expiry and a background sweeper.
pub struct MemoryStore {
    inner: Arc<Inner>,
    sweeper: JoinHandle<()>,
}

impl MemoryStore {
    /// Build an empty store and start its background sweeper task.
    #[must_use]
    pub fn new() -> Self {
        let inner = Arc::new(Inner::default());
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&inner)));
        Self { inner, sweeper }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

async fn sweep_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let now = Instant::now();
        inner.values.retain(|_, v| !v.is_expired(now));
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    let Some(star) = pattern.find('*') else {
        return candidate.starts_with(pattern);
    };
    let (prefix, rest) = pattern.split_at(star);
    let suffix = &rest[1..];
    if !candidate.starts_with(prefix) {
        return false;
    }
    if suffix.is_empty() {
        return true;
    }
    glob_match(suffix, &candidate[prefix.len()..])
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        match self.inner.values.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.bytes.clone())),
            Some(_) => {
                drop(self.inner.values.remove(key));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.inner
            .values
            .insert(key.to_owned(), StoredValue { bytes: value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let had_value = self.inner.values.remove(key).is_some();
        let had_list = self.inner.lists.remove(key).is_some();
        Ok(had_value || had_list)
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let mut entry = self.inner.values.entry(key.to_owned()).or_insert_with(|| StoredValue {
            bytes: b"0".to_vec(),
            expires_at: None,
        });
        let current: i64 = std::str::from_utf8(&entry.bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current.saturating_add(by);
        entry.bytes = next.to_string().into_bytes();
        Ok(next)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut matches: Vec<String> = self
            .inner
            .values
            .iter()
            .filter(|entry| !entry.is_expired(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        matches.extend(
            self.inner
                .lists
                .iter()
                .filter(|entry| glob_match(pattern, entry.key()))
                .map(|entry| entry.key().clone()),
        );
        matches.sort();
        matches.dedup();
        Ok(matches)
    }

    async fn list_append(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.lists.entry(key.to_owned()).or_default().push_back(value);
        Ok(())
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.inner.lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn list_pop(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lists.get_mut(key).and_then(|mut l| l.pop_front()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_defaults_to_zero_then_accumulates() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("counter", 3).await.unwrap(), 3);
        assert_eq!(store.incr("counter", 4).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn list_operations_are_fifo() {
        let store = MemoryStore::new();
        store.list_append("q", b"a".to_vec()).await.unwrap();
        store.list_append("q", b"b".to_vec()).await.unwrap();
        assert_eq!(store.list_len("q").await.unwrap(), 2);
        assert_eq!(store.list_pop("q").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.list_len("q").await.unwrap(), 1);
    }

    #[rstest]
    #[case("cache:idx:file:abc:", "cache:idx:file:abc:1234", true)]
    #[case("cache:idx:file:abc:", "cache:idx:file:xyz:1234", false)]
    #[case("cache:*:abc", "cache:idx:abc", true)]
    fn glob_match_supports_prefix_and_wildcard(
        #[case] pattern: &str,
        #[case] candidate: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(glob_match(pattern, candidate), expected);
    }

    #[tokio::test]
    async fn scan_returns_matching_keys_only() {
        let store = MemoryStore::new();
        store.set("cache:idx:file:abc:1", Vec::new(), None).await.unwrap();
        store.set("cache:idx:file:xyz:2", Vec::new(), None).await.unwrap();
        let matches = store.scan("cache:idx:file:abc:").await.unwrap();
        assert_eq!(matches, vec!["cache:idx:file:abc:1".to_owned()]);
    }
}
