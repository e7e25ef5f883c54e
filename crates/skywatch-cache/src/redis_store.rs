//! Redis cache backend.
//!
//! Wraps a multiplexed [`ConnectionManager`], which reconnects on its own after
//! transient drops. Initial connection goes through the shared
//! [`RetryPolicy`]; once its budget is spent the connection is fatal. The
//! manager's own connect backoff is disabled so the policy is the only
//! retry schedule.
//!
//! Every command is bounded by a response timeout so an unreachable server
//! turns into a quick miss instead of a stalled caller. Consecutive failures
//! are counted; past the retry budget the backend reports itself broken via
//! [`CacheBackend::health`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use skywatch_core::RetryPolicy;

use crate::CacheBackend;
use crate::error::{Error, Result};

/// Connection settings for the Redis backend.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Server hostname.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Upper bound on a single command round-trip.
    pub response_timeout: Duration,

    /// Connection retry schedule; also the consecutive-failure budget.
    pub retry: RetryPolicy,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "redis".to_string(),
            port: 6379,
            response_timeout: Duration::from_secs(2),
            retry: RetryPolicy::CACHE,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    ///
    /// - `REDIS_HOSTNAME`: server host (default: "redis")
    /// - `REDIS_PORT`: server port (default: 6379; unparseable values fall back)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("REDIS_HOSTNAME").unwrap_or(defaults.host);
        let port = std::env::var("REDIS_PORT")
            .ok()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(defaults.port);

        tracing::info!(host = %host, port, "cache configuration loaded");

        Self {
            host,
            port,
            ..defaults
        }
    }

    /// Connection URL for the redis driver.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

/// Redis-backed [`CacheBackend`].
pub struct RedisBackend {
    connection: ConnectionManager,
    response_timeout: Duration,
    consecutive_failures: AtomicU32,
    failure_budget: u32,
}

impl RedisBackend {
    /// Connect, retrying per `config.retry`.
    ///
    /// An invalid URL fails immediately; unreachable servers are retried until
    /// the budget is spent, then [`skywatch_core::Error::RetriesExhausted`] is
    /// returned wrapped in [`Error::Core`].
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url())?;

        let connection = config
            .retry
            .run("redis connect", |_| {
                let client = client.clone();
                async move { ConnectionManager::new_with_config(client, manager_config()).await }
            })
            .await?;

        tracing::info!("Redis connection established: {}", config.url());

        Ok(Self {
            connection,
            response_timeout: config.response_timeout,
            consecutive_failures: AtomicU32::new(0),
            failure_budget: config.retry.max_retries,
        })
    }

    /// Run one command with the response timeout and failure accounting.
    async fn query<T>(&self, cmd: redis::Cmd) -> Result<T>
    where
        T: redis::FromRedisValue + Send,
    {
        let mut connection = self.connection.clone();
        let request = async {
            let value: T = cmd.query_async(&mut connection).await?;
            Ok::<T, redis::RedisError>(value)
        };

        let result = match tokio::time::timeout(self.response_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Redis(e)),
            Err(_) => Err(Error::Timeout(self.response_timeout)),
        };

        match &result {
            Ok(_) => self.consecutive_failures.store(0, Ordering::Relaxed),
            Err(_) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        result
    }
}

/// One connect attempt per call; retries belong to [`RedisConfig::retry`].
fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new().set_number_of_retries(0)
}

impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut cmd = redis::cmd("SETEX");
        cmd.arg(key).arg(ttl.as_secs().max(1)).arg(value);
        self.query(cmd).await
    }

    fn health(&self) -> Result<()> {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures > self.failure_budget {
            return Err(Error::ConnectionLost { failures });
        }
        Ok(())
    }
}
