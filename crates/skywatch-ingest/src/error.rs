//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// Kafka client error.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// HTTP transport error talking to the search cluster.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Search cluster answered with a non-success status.
    #[error("Elasticsearch returned {status}: {body}")]
    Elastic {
        /// HTTP status code.
        status: u16,
        /// Response body, for the log line.
        body: String,
    },

    /// Shared pipeline error (event decoding, retry exhaustion).
    #[error(transparent)]
    Core(#[from] skywatch_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Index queue was closed while submitting.
    #[error("index queue closed")]
    QueueClosed,

    /// Message source failed in a way that cannot be retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error should stop the process rather than a single message.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Core(e) => e.is_fatal(),
            Self::Transport(_) | Self::QueueClosed | Self::Config(_) => true,
            _ => false,
        }
    }
}
