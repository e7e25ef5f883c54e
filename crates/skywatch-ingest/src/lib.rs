//! Skywatch ingestion pipeline components.
//!
//! This crate consumes cosmic events from an ordered log, indexes each one
//! into Elasticsearch, and pushes urgent ones to WebSocket subscribers.
//!
//! # Modules
//!
//! - [`source`] - Message sources (Kafka, JSONL replay)
//! - [`consumer`] - The consumer loop driving a source through a handler
//! - [`pipeline`] - Per-message decoding, alerting, and index submission
//! - [`index`] - Search index gateway and its worker pool
//! - [`alert`] - Alert broadcaster and WebSocket server
//! - [`config`] - Daemon configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  MessageStream  │  Kafka topic or JSONL replay
//! └────────┬────────┘
//!          │ one message at a time, acked after handling
//!          ▼
//! ┌─────────────────┐      urgency > threshold     ┌──────────────────┐
//! │  EventPipeline  │ ───────────────────────────► │ AlertBroadcaster │ ──► WebSocket clients
//! └────────┬────────┘                              └──────────────────┘
//!          │ every decoded event
//!          ▼
//! ┌─────────────────┐
//! │ IndexWorkerPool │  bounded queue, N concurrent writes
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │  ElasticIndex   │  one document per event
//! └─────────────────┘
//! ```
//!
//! Delivery is at-least-once: a message is acknowledged only after it has
//! been handed to the index queue, and redelivered events overwrite their
//! earlier document when document ids are enabled.

pub mod alert;
pub mod config;
pub mod consumer;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use alert::{Alert, AlertBroadcaster, PublishReport, Subscription};
pub use config::IngestArgs;
pub use consumer::{ConsumerStats, Disposition, MessageHandler, StreamConsumer};
pub use index::{
    ElasticConfig, ElasticIndex, IndexOutcome, IndexPoolConfig, IndexQueue, IndexResponse,
    IndexWorkerPool, IndexerStats, SearchIndex, ensure_index, log_outcomes,
};
pub use pipeline::{EventPipeline, PipelineConfig};
pub use source::{JsonlSource, MessagePosition, MessageStream, StreamMessage};

#[cfg(feature = "kafka")]
pub use source::{KafkaConfig, KafkaSession, KafkaSource, KafkaStream};
