//! Cache error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by cache backends.
///
/// [`CacheStore`](crate::CacheStore) absorbs these on `get`/`set`; they only
/// surface from connection setup and [`CacheStore::ensure_healthy`](crate::CacheStore::ensure_healthy).
#[derive(Error, Debug)]
pub enum Error {
    /// Redis driver error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backend did not answer within the response timeout.
    #[error("cache backend did not respond within {0:?}")]
    Timeout(Duration),

    /// Too many consecutive failures; the connection is considered broken.
    #[error("cache connection lost after {failures} consecutive failures")]
    ConnectionLost {
        /// Consecutive failed operations observed.
        failures: u32,
    },

    /// Value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shared pipeline error (e.g., retry budget exhausted on connect).
    #[error(transparent)]
    Core(#[from] skywatch_core::Error),
}

impl Error {
    /// Whether the owning process should treat this as unrecoverable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ConnectionLost { .. } => true,
            Self::Core(e) => e.is_fatal(),
            _ => false,
        }
    }
}
