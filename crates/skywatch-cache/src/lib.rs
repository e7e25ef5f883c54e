//! Best-effort cache-aside store for derived views.
//!
//! The store sits in front of an external key/value backend and is never
//! required for correctness: callers always keep a way to recompute.
//!
//! ## Semantics
//!
//! - Values are stored as JSON with a fixed TTL ([`DEFAULT_TTL`], one hour).
//! - [`CacheStore::set`] never fails; backend errors are logged and dropped.
//! - [`CacheStore::get`] returns `None` for absent, expired, undecodable, or
//!   unreachable entries alike.
//! - [`CacheStore::ensure_healthy`] is the one place a broken connection
//!   surfaces, so the owning process can decide to stop.
//!
//! ## Cache Key Strategy
//!
//! Keys should include the view name and every parameter that affects it
//! (e.g., `events_by_type:GRB:2024-06-10`).

mod error;
mod memory;
mod redis_store;

use std::future::Future;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

pub use error::{Error, Result};
pub use memory::{DEFAULT_CAPACITY, MemoryBackend};
pub use redis_store::{RedisBackend, RedisConfig};

/// Time-to-live applied to every write.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Raw string storage behind a [`CacheStore`].
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetch the stored string for `key`, `None` if absent or expired.
    fn get_raw(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store `value` under `key`, expiring after `ttl`.
    fn set_raw(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Whether the backend connection is still usable.
    fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// JSON cache-aside facade over a [`CacheBackend`].
pub struct CacheStore<B> {
    backend: B,
    ttl: Duration,
}

impl<B: CacheBackend> CacheStore<B> {
    /// Create a store writing with [`DEFAULT_TTL`].
    pub fn new(backend: B) -> Self {
        Self::with_ttl(backend, DEFAULT_TTL)
    }

    /// Create a store writing with a custom TTL.
    pub fn with_ttl(backend: B, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// TTL applied on writes.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Serialize `value` and store it under `key`.
    ///
    /// Advisory: failures are logged and swallowed.
    pub async fn set<T>(&self, key: &str, value: &T)
    where
        T: Serialize + ?Sized,
    {
        let json = match encode(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to serialize for cache");
                return;
            }
        };

        if let Err(e) = self.backend.set_raw(key, json, self.ttl).await {
            metrics::counter!("cache_errors_total", "op" => "set").increment(1);
            tracing::error!(
                key = %key,
                backend = self.backend.name(),
                error = %e,
                "failed to set cache"
            );
        }
    }

    /// Fetch and deserialize the value under `key`.
    ///
    /// Backend failures are indistinguishable from a miss.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let raw = match self.backend.get_raw(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::counter!("cache_misses_total").increment(1);
                tracing::debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                metrics::counter!("cache_errors_total", "op" => "get").increment(1);
                metrics::counter!("cache_misses_total").increment(1);
                tracing::error!(
                    key = %key,
                    backend = self.backend.name(),
                    error = %e,
                    "failed fetching data from cache"
                );
                return None;
            }
        };

        match decode(&raw) {
            Ok(value) => {
                metrics::counter!("cache_hits_total").increment(1);
                tracing::debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                // Corrupted or stale-shape entry - treat as a miss
                metrics::counter!("cache_misses_total").increment(1);
                tracing::warn!(key = %key, error = %e, "failed to deserialize cached entry");
                None
            }
        }
    }

    /// Get a cached value or compute and cache it.
    ///
    /// 1. Returns the cached value if present and decodable
    /// 2. Otherwise calls `compute`
    /// 3. Stores a successful result and returns it
    ///
    /// Errors from `compute` are returned untouched and nothing is cached.
    ///
    /// ```ignore
    /// let counts = store
    ///     .get_or_compute("counts_by_type", || async { query_index(&client).await })
    ///     .await?;
    /// ```
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, compute: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        tracing::debug!(key = %key, "computing value for cache");
        let value = compute().await?;
        self.set(key, &value).await;
        Ok(value)
    }

    /// Report a fatal error once the backend connection is considered broken.
    pub fn ensure_healthy(&self) -> Result<()> {
        self.backend.health()
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct View {
        name: String,
        counts: Vec<u32>,
        nested: Option<Box<View>>,
    }

    fn sample_view() -> View {
        View {
            name: "grb_by_day".to_string(),
            counts: vec![3, 1, 4, 1, 5],
            nested: Some(Box::new(View {
                name: "inner".to_string(),
                counts: vec![],
                nested: None,
            })),
        }
    }

    /// Backend that fails every call, standing in for an unreachable server.
    struct Unreachable {
        calls: AtomicUsize,
    }

    impl Unreachable {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl CacheBackend for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn get_raw(&self, _key: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Timeout(Duration::from_millis(10)))
        }

        async fn set_raw(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Timeout(Duration::from_millis(10)))
        }

        fn health(&self) -> Result<()> {
            Err(Error::ConnectionLost { failures: 11 })
        }
    }

    #[test]
    fn test_codec_errors_are_serialization_errors() {
        // JSON object keys must be strings.
        let unencodable = std::collections::HashMap::from([((1, 2), "x")]);
        let err = encode(&unencodable).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)), "{err}");
        assert!(!err.is_fatal());

        let err = decode::<View>("{\"name\":").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)), "{err}");
    }

    #[tokio::test]
    async fn test_unencodable_value_is_not_stored() {
        let store = CacheStore::new(MemoryBackend::default());
        let unencodable = std::collections::HashMap::from([((1, 2), "x")]);

        store.set("bad", &unencodable).await;
        assert_eq!(store.get::<serde_json::Value>("bad").await, None);
    }

    #[tokio::test]
    async fn test_set_then_get_returns_equal_value() {
        let store = CacheStore::new(MemoryBackend::default());
        let view = sample_view();

        store.set("view", &view).await;
        let cached: Option<View> = store.get("view").await;

        assert_eq!(cached, Some(view));
    }

    #[tokio::test]
    async fn test_get_unset_key_misses() {
        let store = CacheStore::new(MemoryBackend::default());
        let cached: Option<View> = store.get("never-set").await;
        assert!(cached.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_expired_key_misses() {
        let store = CacheStore::with_ttl(MemoryBackend::default(), Duration::from_secs(10));
        store.set("view", &sample_view()).await;

        tokio::time::advance(Duration::from_secs(11)).await;

        let cached: Option<View> = store.get("view").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_default_ttl_is_one_hour() {
        let store = CacheStore::new(MemoryBackend::default());
        assert_eq!(store.ttl(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_undecodable_entry_misses() {
        let store = CacheStore::new(MemoryBackend::default());
        store.set("view", &"just a string").await;
        let cached: Option<View> = store.get("view").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades() {
        let store = CacheStore::new(Unreachable::new());

        // Neither call raises.
        store.set("view", &sample_view()).await;
        let cached: Option<View> = store.get("view").await;

        assert!(cached.is_none());
        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_backend_reports_unhealthy() {
        let store = CacheStore::new(Unreachable::new());
        let err = store.ensure_healthy().unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_get_or_compute_hit_skips_compute() {
        let store = CacheStore::new(MemoryBackend::default());

        let first: std::result::Result<i32, ()> =
            store.get_or_compute("answer", || async { Ok(42) }).await;
        assert_eq!(first, Ok(42));

        let second: std::result::Result<i32, ()> = store
            .get_or_compute("answer", || async {
                panic!("compute should not be called on cache hit")
            })
            .await;
        assert_eq!(second, Ok(42));
    }

    #[tokio::test]
    async fn test_get_or_compute_falls_back_when_backend_down() {
        let store = CacheStore::new(Unreachable::new());
        let computed = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: std::result::Result<View, ()> = store
                .get_or_compute("view", || async {
                    computed.fetch_add(1, Ordering::SeqCst);
                    Ok(sample_view())
                })
                .await;
            assert_eq!(value, Ok(sample_view()));
        }

        // No caching possible, so every call recomputes.
        assert_eq!(computed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_or_compute_error_is_not_cached() {
        let store = CacheStore::new(MemoryBackend::default());

        let failed: std::result::Result<i32, &str> =
            store.get_or_compute("flaky", || async { Err("index down") }).await;
        assert_eq!(failed, Err("index down"));

        let cached: Option<i32> = store.get("flaky").await;
        assert!(cached.is_none());
    }
}
