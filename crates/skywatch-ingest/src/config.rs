//! Command-line and environment configuration for the ingest daemon.
//!
//! Every flag can also be set through the environment variable shown in
//! `--help`. A `.env` file in the working directory is loaded first.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use skywatch_core::{MAX_URGENCY, MIN_URGENCY, RetryPolicy, Urgency};

use crate::index::{ElasticConfig, IndexPoolConfig};
use crate::pipeline::PipelineConfig;
use crate::{Error, Result};

/// Skywatch ingestion daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "skywatch-ingest")]
#[command(about = "Consumes cosmic events, indexes them, and pushes urgent ones to alert subscribers")]
#[command(version)]
pub struct IngestArgs {
    /// Kafka bootstrap brokers (comma-separated host:port)
    #[arg(long, env = "KAFKA_HOSTNAME", value_delimiter = ',', default_value = "localhost:9092")]
    pub kafka_brokers: Vec<String>,

    /// Topic carrying serialized events
    #[arg(long, env = "KAFKA_TOPIC", default_value = "cosmic-events-topic")]
    pub kafka_topic: String,

    /// Consumer group id
    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "elastic-ingestor-group")]
    pub kafka_group_id: String,

    /// Client id reported to the brokers
    #[arg(long, env = "KAFKA_CLIENT_ID", default_value = "elastic-ingestor")]
    pub kafka_client_id: String,

    /// Use TLS for broker connections
    #[arg(long, env = "KAFKA_USE_SSL")]
    pub kafka_use_ssl: bool,

    /// Authenticate with SASL PLAIN
    #[arg(long, env = "KAFKA_USE_AUTH")]
    pub kafka_use_auth: bool,

    /// SASL username
    #[arg(long, env = "KAFKA_USERNAME", default_value = "")]
    pub kafka_username: String,

    /// SASL password
    #[arg(long, env = "KAFKA_PASSWORD", default_value = "", hide_env_values = true)]
    pub kafka_password: String,

    /// Start from the earliest retained record when the group has no offsets
    #[arg(long, env = "KAFKA_FROM_BEGINNING", default_value_t = true, action = ArgAction::Set)]
    pub from_beginning: bool,

    /// Elasticsearch base URL
    #[arg(long, env = "ELASTIC_URL", default_value = "http://localhost:9200")]
    pub elastic_url: String,

    /// Index that receives event documents
    #[arg(long, env = "ELASTIC_INDEX", default_value = "cosmic-events")]
    pub elastic_index: String,

    /// Elasticsearch basic auth username
    #[arg(long, env = "ELASTIC_USERNAME")]
    pub elastic_username: Option<String>,

    /// Elasticsearch basic auth password
    #[arg(long, env = "ELASTIC_PASSWORD", hide_env_values = true)]
    pub elastic_password: Option<String>,

    /// Let Elasticsearch assign document ids (redelivered events duplicate)
    #[arg(long, env = "ELASTIC_NO_DOCUMENT_IDS")]
    pub no_document_ids: bool,

    /// Maximum concurrent index requests
    #[arg(long, env = "INDEX_WORKERS", default_value = "4")]
    pub index_workers: usize,

    /// Documents buffered before consumption waits on the index
    #[arg(long = "index-queue", env = "INDEX_QUEUE_CAPACITY", default_value = "1024")]
    pub index_queue_capacity: usize,

    /// Alert server bind address
    #[arg(long, env = "ALERT_BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub alert_addr: SocketAddr,

    /// Alerts buffered per subscriber before new ones are dropped for it
    #[arg(long, env = "ALERT_BUFFER", default_value = "256")]
    pub alert_buffer: usize,

    /// Events with urgency above this level are alerted
    #[arg(long, env = "ALERT_URGENCY_THRESHOLD", default_value = "1")]
    pub alert_threshold: i64,

    /// Retries for broker and search connections before giving up
    #[arg(long, env = "CONNECT_RETRIES", default_value = "5")]
    pub connect_retries: u32,

    /// Replay a JSONL capture instead of consuming from Kafka
    #[arg(long, env = "REPLAY_FILE")]
    pub replay: Option<PathBuf>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,
}

impl IngestArgs {
    /// Retry schedule for broker and search connections.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::BROKER.with_max_retries(self.connect_retries)
    }

    /// Search cluster settings.
    pub fn elastic_config(&self) -> ElasticConfig {
        ElasticConfig {
            url: self.elastic_url.clone(),
            username: self.elastic_username.clone(),
            password: self.elastic_password.clone(),
            ..Default::default()
        }
    }

    /// Index worker pool sizing.
    pub fn pool_config(&self) -> IndexPoolConfig {
        IndexPoolConfig {
            index: self.elastic_index.clone(),
            workers: self.index_workers,
            queue_capacity: self.index_queue_capacity,
        }
    }

    /// Per-message pipeline settings.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let alert_threshold = Urgency::new(self.alert_threshold).map_err(|_| {
            Error::Config(format!(
                "alert threshold must be between {MIN_URGENCY} and {MAX_URGENCY}, got {}",
                self.alert_threshold
            ))
        })?;

        Ok(PipelineConfig {
            alert_threshold,
            document_ids: !self.no_document_ids,
        })
    }

    /// Broker settings.
    #[cfg(feature = "kafka")]
    pub fn kafka_config(&self) -> Result<crate::source::KafkaConfig> {
        use crate::source::{KafkaConfig, SaslCredentials};

        let brokers: Vec<String> = self
            .kafka_brokers
            .iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if brokers.is_empty() {
            return Err(Error::Config("no Kafka brokers configured".to_string()));
        }

        let sasl = if self.kafka_use_auth {
            if self.kafka_username.is_empty() {
                return Err(Error::Config(
                    "KAFKA_USE_AUTH is set but KAFKA_USERNAME is empty".to_string(),
                ));
            }
            Some(SaslCredentials {
                username: self.kafka_username.clone(),
                password: self.kafka_password.clone(),
            })
        } else {
            None
        };

        Ok(KafkaConfig {
            brokers,
            group_id: self.kafka_group_id.clone(),
            client_id: self.kafka_client_id.clone(),
            use_ssl: self.kafka_use_ssl,
            sasl,
            ..Default::default()
        })
    }
}
