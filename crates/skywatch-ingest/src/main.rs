//! Skywatch ingestion daemon.
//!
//! Consumes serialized cosmic events from Kafka, writes each one to
//! Elasticsearch, and pushes urgent ones to WebSocket subscribers.
//!
//! # Usage
//!
//! ```bash
//! # Run against local services with default settings
//! skywatch-ingest
//!
//! # Point at a remote cluster with SASL over TLS
//! KAFKA_HOSTNAME=kafka.internal:9093 KAFKA_USE_SSL=true KAFKA_USE_AUTH=true \
//!     KAFKA_USERNAME=ingestor KAFKA_PASSWORD=... \
//!     skywatch-ingest --elastic-url https://search.internal:9200
//!
//! # Replay a capture without a broker
//! skywatch-ingest --replay ./captures/2024-06-10.jsonl
//! ```
//!
//! # Startup
//!
//! Startup failures exit non-zero: Elasticsearch or Kafka unreachable after
//! the retry budget, the index cannot be created, or the alert port cannot be
//! bound.
//!
//! # Graceful Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C) and SIGTERM:
//! 1. Stops pulling new messages
//! 2. Closes the index queue and waits for in-flight writes
//! 3. Stops the alert server and exits

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use skywatch_core::metrics::{init_metrics, start_metrics_server};
use skywatch_ingest::alert::server as alert_server;
use skywatch_ingest::{
    AlertBroadcaster, ConsumerStats, ElasticIndex, EventPipeline, IndexWorkerPool, IngestArgs,
    JsonlSource, MessageStream, StreamConsumer, ensure_index, log_outcomes,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing so clap's env fallbacks see the file.
    let dotenv_path = dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("skywatch_ingest=debug".parse()?),
        )
        .init();

    if let Some(path) = dotenv_path {
        tracing::info!("Loaded environment from {}", path.display());
    }

    let args = IngestArgs::parse();
    let pipeline_config = args.pipeline_config()?;

    #[cfg(not(feature = "kafka"))]
    if args.replay.is_none() {
        anyhow::bail!("built without the `kafka` feature; pass --replay <file>");
    }

    tracing::info!("Skywatch ingestion daemon starting...");

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
    }

    // Set up graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    tracing::info!("Configuration:");
    match &args.replay {
        Some(path) => tracing::info!("  Source: replay {}", path.display()),
        None => tracing::info!(
            "  Source: kafka {} topic={} group={}",
            args.kafka_brokers.join(","),
            args.kafka_topic,
            args.kafka_group_id
        ),
    }
    tracing::info!("  Index: {} / {}", args.elastic_url, args.elastic_index);
    tracing::info!(
        "  Index workers: {} (queue {})",
        args.index_workers,
        args.index_queue_capacity
    );
    tracing::info!("  Alert threshold: urgency > {}", pipeline_config.alert_threshold);
    tracing::info!("  Document ids: {}", pipeline_config.document_ids);

    let policy = args.retry_policy();

    // Search index: connect and make sure the target index exists
    let elastic = ElasticIndex::connect(&args.elastic_config(), &policy)
        .await
        .context("Failed to connect to Elasticsearch")?;
    ensure_index(&elastic, &args.elastic_index)
        .await
        .with_context(|| format!("Failed to prepare index {}", args.elastic_index))?;

    // Alert fan-out
    let broadcaster = AlertBroadcaster::new(args.alert_buffer);
    let (_, alert_server) = alert_server::start(args.alert_addr, Arc::clone(&broadcaster))
        .await
        .with_context(|| format!("Failed to bind alert server on {}", args.alert_addr))?;

    // Indexing
    let (pool, queue, outcomes) = IndexWorkerPool::start(Arc::new(elastic), args.pool_config());
    let outcome_logger = tokio::spawn(log_outcomes(outcomes));

    let pipeline = EventPipeline::new(Arc::clone(&broadcaster), queue, pipeline_config);

    tracing::info!("Starting ingestion...");
    let result = match &args.replay {
        Some(path) => match JsonlSource::open(path).await {
            Ok(source) => consume(source, &pipeline, &running).await,
            Err(e) => Err(e.into()),
        },
        None => consume_kafka(&args, &policy, &pipeline, &running).await,
    };

    // Shutdown sequence
    tracing::info!("Shutting down...");

    // Closing the last queue handle lets the pool drain
    drop(pipeline);
    let indexer_stats = pool.shutdown().await;
    let logged = outcome_logger.await.unwrap_or_default();
    alert_server.abort();

    let stats = result?;

    // Print summary
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Messages received:    {}", stats.received);
    tracing::info!("Events processed:     {}", stats.processed);
    tracing::info!("Alerts triggered:     {}", stats.alerted);
    tracing::info!("Malformed messages:   {}", stats.malformed);
    tracing::info!("Handler errors:       {}", stats.failed);
    tracing::info!("Documents indexed:    {}", indexer_stats.documents_indexed);
    tracing::info!("Index failures:       {}", indexer_stats.documents_failed);
    tracing::info!("Outcomes logged:      {}", logged.documents_indexed + logged.documents_failed);

    Ok(())
}

async fn consume<S: MessageStream>(
    source: S,
    pipeline: &EventPipeline,
    running: &Arc<AtomicBool>,
) -> Result<ConsumerStats> {
    let stats = StreamConsumer::new(source)
        .with_running_flag(Arc::clone(running))
        .run(pipeline)
        .await?;
    Ok(stats)
}

#[cfg(feature = "kafka")]
async fn consume_kafka(
    args: &IngestArgs,
    policy: &skywatch_core::RetryPolicy,
    pipeline: &EventPipeline,
    running: &Arc<AtomicBool>,
) -> Result<ConsumerStats> {
    use skywatch_ingest::KafkaSource;

    let config = args.kafka_config()?;
    let session = KafkaSource::connect(&config, policy)
        .await
        .context("Failed to connect to Kafka")?;
    let stream = session
        .subscribe(&args.kafka_topic, args.from_beginning)
        .with_context(|| format!("Failed to subscribe to {}", args.kafka_topic))?;

    consume(stream, pipeline, running).await
}

#[cfg(not(feature = "kafka"))]
async fn consume_kafka(
    _args: &IngestArgs,
    _policy: &skywatch_core::RetryPolicy,
    _pipeline: &EventPipeline,
    _running: &Arc<AtomicBool>,
) -> Result<ConsumerStats> {
    anyhow::bail!("built without the `kafka` feature; pass --replay <file>")
}
