//! In-process cache backend built on moka.
//!
//! Mirrors the Redis backend's semantics (string values, per-write TTL) so the
//! cache store behaves the same in local runs and tests as in production.

use std::time::Duration;

use moka::future::Cache;
use tokio::time::Instant;

use crate::error::Result;
use crate::{CacheBackend, DEFAULT_TTL};

/// Default capacity (number of entries).
pub const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Clone, Debug)]
struct Entry {
    json: String,
    expires_at: Instant,
}

/// moka-backed [`CacheBackend`].
#[derive(Clone)]
pub struct MemoryBackend {
    cache: Cache<String, Entry>,
}

impl MemoryBackend {
    /// Create a backend holding at most `capacity` entries.
    ///
    /// Entries never outlive [`DEFAULT_TTL`] regardless of the TTL passed to
    /// `set_raw`; shorter TTLs are enforced on read.
    pub fn new(capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(DEFAULT_TTL)
            .build();
        Self { cache }
    }

    /// Number of entries currently held (approximate).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        match self.cache.get(key).await {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.json)),
            Some(_) => {
                self.cache.invalidate(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let entry = Entry {
            json: value,
            expires_at: Instant::now() + ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let backend = MemoryBackend::default();
        backend
            .set_raw("k", "\"v\"".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get_raw("k").await.unwrap().as_deref(), Some("\"v\""));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let backend = MemoryBackend::default();
        assert!(backend.get_raw("absent").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let backend = MemoryBackend::default();
        backend
            .set_raw("short", "1".to_string(), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(backend.get_raw("short").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(backend.get_raw("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let backend = MemoryBackend::default();
        let ttl = Duration::from_secs(60);
        backend.set_raw("k", "1".to_string(), ttl).await.unwrap();
        backend.set_raw("k", "2".to_string(), ttl).await.unwrap();
        assert_eq!(backend.get_raw("k").await.unwrap().as_deref(), Some("2"));
    }
}
