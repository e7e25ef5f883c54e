//! Kafka message source.
//!
//! Connection is split in two steps so startup failures are attributed
//! correctly:
//!
//! 1. [`KafkaSource::connect`] proves a broker is reachable by fetching
//!    cluster metadata, retrying per the shared [`RetryPolicy`].
//! 2. [`KafkaSession::subscribe`] creates the group consumer for one topic.
//!
//! Offsets are committed by librdkafka's auto-commit, but only offsets that
//! were explicitly stored through [`MessageStream::ack`] are eligible. A
//! record is therefore committed only after the pipeline has handled it
//! (at-least-once; a restart may redeliver the tail).

use std::fmt;
use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::Message;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer as KafkaConsumer};
use skywatch_core::RetryPolicy;

use super::{MessageStream, StreamMessage};
use crate::{Error, Result};

/// SASL PLAIN credentials.
#[derive(Clone)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Bootstrap brokers (`host:port`).
    pub brokers: Vec<String>,

    /// Consumer group id.
    pub group_id: String,

    /// Client id reported to the brokers.
    pub client_id: String,

    /// Encrypt broker connections with TLS.
    pub use_ssl: bool,

    /// Authenticate with SASL PLAIN when set.
    pub sasl: Option<SaslCredentials>,

    /// Timeout for the connect-time metadata request.
    pub metadata_timeout: Duration,

    /// Group session timeout.
    pub session_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            group_id: "elastic-ingestor-group".to_string(),
            client_id: "elastic-ingestor".to_string(),
            use_ssl: false,
            sasl: None,
            metadata_timeout: Duration::from_secs(5),
            session_timeout: Duration::from_secs(30),
        }
    }
}

impl KafkaConfig {
    /// `security.protocol` value for the TLS and SASL settings.
    pub fn security_protocol(&self) -> &'static str {
        match (self.use_ssl, self.sasl.is_some()) {
            (false, false) => "plaintext",
            (true, false) => "ssl",
            (false, true) => "sasl_plaintext",
            (true, true) => "sasl_ssl",
        }
    }

    /// librdkafka settings shared by the probe and the group consumer.
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", &self.group_id)
            .set("client.id", &self.client_id)
            .set("security.protocol", self.security_protocol())
            .set(
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            )
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false");

        if let Some(sasl) = &self.sasl {
            config
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        config
    }
}

/// Entry point for broker connections.
pub struct KafkaSource;

impl KafkaSource {
    /// Establish a broker session, retrying transient failures.
    ///
    /// Fails with a fatal [`skywatch_core::Error::RetriesExhausted`] once the
    /// policy's budget is spent.
    pub async fn connect(config: &KafkaConfig, policy: &RetryPolicy) -> Result<KafkaSession> {
        let client_config = config.client_config();
        let timeout = config.metadata_timeout;

        let brokers = policy
            .run("kafka connect", |_| {
                let client_config = client_config.clone();
                async move { fetch_broker_count(client_config, timeout).await }
            })
            .await?;

        tracing::info!(
            brokers,
            bootstrap = %config.brokers.join(","),
            protocol = config.security_protocol(),
            "Connected to Kafka"
        );

        Ok(KafkaSession {
            config: config.clone(),
            client_config,
        })
    }
}

/// Metadata round-trip on a throwaway consumer; the call blocks, so it runs
/// off the async workers.
async fn fetch_broker_count(client_config: ClientConfig, timeout: Duration) -> Result<usize> {
    let probe: BaseConsumer = client_config.create()?;
    let metadata = tokio::task::spawn_blocking(move || probe.fetch_metadata(None, timeout))
        .await
        .map_err(|e| Error::Transport(format!("metadata task failed: {e}")))??;

    if metadata.brokers().is_empty() {
        return Err(Error::Transport("cluster reported no brokers".to_string()));
    }
    Ok(metadata.brokers().len())
}

/// A verified broker session, ready to subscribe.
pub struct KafkaSession {
    config: KafkaConfig,
    client_config: ClientConfig,
}

impl KafkaSession {
    /// Settings the session was opened with.
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Join the consumer group and subscribe to `topic`.
    ///
    /// With `from_beginning`, a group without committed offsets starts at the
    /// earliest retained record; otherwise it only sees new records.
    pub fn subscribe(self, topic: &str, from_beginning: bool) -> Result<KafkaStream> {
        let mut client_config = self.client_config;
        client_config.set(
            "auto.offset.reset",
            if from_beginning { "earliest" } else { "latest" },
        );

        let consumer: KafkaConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;

        tracing::info!(
            topic,
            group_id = %self.config.group_id,
            from_beginning,
            "Subscribed to topic"
        );

        Ok(KafkaStream {
            consumer,
            topic: topic.to_string(),
        })
    }
}

/// Subscribed group consumer.
pub struct KafkaStream {
    consumer: KafkaConsumer,
    topic: String,
}

impl KafkaStream {
    /// Subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl MessageStream for KafkaStream {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        let message = self.consumer.recv().await?;
        Ok(Some(StreamMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp_ms: message.timestamp().to_millis(),
        }))
    }

    fn ack(&mut self, message: &StreamMessage) -> Result<()> {
        // The committed offset is the next one to read.
        self.consumer
            .store_offset(&message.topic, message.partition, message.offset + 1)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> SaslCredentials {
        SaslCredentials {
            username: "ingestor".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_security_protocol_selection() {
        let mut config = KafkaConfig::default();
        assert_eq!(config.security_protocol(), "plaintext");

        config.use_ssl = true;
        assert_eq!(config.security_protocol(), "ssl");

        config.sasl = Some(credentials());
        assert_eq!(config.security_protocol(), "sasl_ssl");

        config.use_ssl = false;
        assert_eq!(config.security_protocol(), "sasl_plaintext");
    }

    #[test]
    fn test_client_config_defaults() {
        let config = KafkaConfig {
            brokers: vec!["kafka-1:9092".to_string(), "kafka-2:9092".to_string()],
            ..Default::default()
        };
        let client = config.client_config();

        assert_eq!(client.get("bootstrap.servers"), Some("kafka-1:9092,kafka-2:9092"));
        assert_eq!(client.get("group.id"), Some("elastic-ingestor-group"));
        assert_eq!(client.get("client.id"), Some("elastic-ingestor"));
        assert_eq!(client.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(client.get("sasl.mechanism"), None);
    }

    #[test]
    fn test_client_config_sasl() {
        let config = KafkaConfig {
            sasl: Some(credentials()),
            ..Default::default()
        };
        let client = config.client_config();

        assert_eq!(client.get("sasl.mechanism"), Some("PLAIN"));
        assert_eq!(client.get("sasl.username"), Some("ingestor"));
        assert_eq!(client.get("sasl.password"), Some("hunter2"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", credentials());
        assert!(rendered.contains("ingestor"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_connect_past_retry_budget_is_fatal() {
        let config = KafkaConfig {
            brokers: vec!["127.0.0.1:1".to_string()],
            metadata_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let policy = RetryPolicy::BROKER.with_max_retries(1);

        let err = match KafkaSource::connect(&config, &policy).await {
            Ok(_) => panic!("connect to a closed port should fail"),
            Err(e) => e,
        };
        assert!(err.is_fatal(), "unexpected error: {err}");
    }
}
