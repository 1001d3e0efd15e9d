//! Redis-backed [`BackingStore`] for production deployments (`spec.md` §6).
//!
//! Wraps `bb8`/`bb8-redis` to provide pooled async connections. Connection
//! lifecycle, checkout timeout, and pool sizing follow the same shape as
//! the corpus's Diesel connection pool wrapper, substituting a Redis
//! manager for a Postgres one.

use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::redis::AsyncCommands;
use bb8_redis::RedisConnectionManager;

use crate::ports::{BackingStore, StoreError};

/// Configuration for the Redis connection pool.
///
/// # Example
/// ```ignore
/// let config = RedisPoolConfig::new("redis://127.0.0.1/")
///     .with_max_size(20)
///     .with_connection_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    url: String,
    max_size: u32,
    connection_timeout: Duration,
}

impl RedisPoolConfig {
    /// Build a config pointed at `url`, defaulting to 10 connections and a
    /// 5 second checkout timeout.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_size: 10,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Set the maximum number of pooled connections.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        assert!(max_size > 0, "max_size must be greater than 0");
        self.max_size = max_size;
        self
    }

    /// Set the connection checkout timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// `bb8`-pooled Redis implementation of [`BackingStore`].
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
}

impl RedisStore {
    /// Connect and build the pool described by `config`.
    pub async fn new(config: RedisPoolConfig) -> Result<Self, StoreError> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|e| StoreError::unavailable(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::unavailable(e.to_string()))
    }
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(|e| StoreError::unavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(duration) => conn
                .set_ex::<_, _, ()>(key, value, duration.as_secs().max(1))
                .await
                .map_err(|e| StoreError::unavailable(e.to_string())),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| StoreError::unavailable(e.to_string())),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await.map_err(|e| StoreError::unavailable(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;
        conn.incr(key, by).await.map_err(|e| StoreError::unavailable(e.to_string()))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let glob = if pattern.ends_with(':') {
            format!("{pattern}*")
        } else {
            pattern.to_owned()
        };
        conn.keys(glob).await.map_err(|e| StoreError::unavailable(e.to_string()))
    }

    async fn list_append(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.rpush::<_, _, ()>(key, value)
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        conn.llen(key).await.map_err(|e| StoreError::unavailable(e.to_string()))
    }

    async fn list_pop(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        conn.lpop(key, None).await.map_err(|e| StoreError::unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[should_panic(expected = "max_size must be greater than 0")]
    fn config_rejects_zero_max_size() {
        let _ = RedisPoolConfig::new("redis://127.0.0.1/").with_max_size(0);
    }

    #[rstest]
    fn config_builder_sets_fields() {
        let config = RedisPoolConfig::new("redis://127.0.0.1/")
            .with_max_size(20)
            .with_connection_timeout(Duration::from_secs(9));
        assert_eq!(config.max_size, 20);
        assert_eq!(config.connection_timeout, Duration::from_secs(9));
    }
}
