//! Message source adapters.
//!
//! A source yields raw records from an ordered log, one at a time, and takes
//! an acknowledgement once the record has been handled. The consumer loop
//! never looks inside the payload; decoding happens in the pipeline.
//!
//! # Available Sources
//!
//! - [`KafkaSource`] - Live consumption from a Kafka topic (feature `kafka`)
//! - [`JsonlSource`] - Replays a JSONL capture (one event per line)

mod jsonl;
#[cfg(feature = "kafka")]
mod kafka;

pub use jsonl::JsonlSource;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaSession, KafkaSource, KafkaStream, SaslCredentials};

use std::fmt;
use std::future::Future;

use crate::Result;

/// One record delivered by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Topic the record was read from.
    pub topic: String,

    /// Partition within the topic.
    pub partition: i32,

    /// Offset within the partition.
    pub offset: i64,

    /// Record key, if the producer set one.
    pub key: Option<Vec<u8>>,

    /// Raw record body. Expected to be a UTF-8 JSON event but not guaranteed.
    pub payload: Vec<u8>,

    /// Broker-assigned timestamp in milliseconds, when available.
    pub timestamp_ms: Option<i64>,
}

impl StreamMessage {
    /// Build a message with no key or broker timestamp.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: payload.into(),
            timestamp_ms: None,
        }
    }

    /// Where this record sits in the log.
    pub fn position(&self) -> MessagePosition {
        MessagePosition {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Log coordinates of a record, used to correlate log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for MessagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// An ordered stream of records.
///
/// Implementations must be cancel-safe in [`next_message`](Self::next_message):
/// the consumer polls it under a timeout so it can observe shutdown while the
/// log is idle.
pub trait MessageStream {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Wait for the next record.
    ///
    /// Returns `Ok(None)` when a finite source is exhausted. Errors are
    /// transport failures and end consumption.
    fn next_message(&mut self) -> impl Future<Output = Result<Option<StreamMessage>>> + Send;

    /// Mark `message` as handled so a restart resumes after it.
    fn ack(&mut self, message: &StreamMessage) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_display() {
        let message = StreamMessage::new("cosmic-events-topic", 2, 1337, b"{}".to_vec());
        assert_eq!(message.position().to_string(), "cosmic-events-topic[2]@1337");
    }

    #[test]
    fn test_new_has_no_key() {
        let message = StreamMessage::new("t", 0, 0, "payload");
        assert!(message.key.is_none());
        assert!(message.timestamp_ms.is_none());
        assert_eq!(message.payload, b"payload");
    }
}
