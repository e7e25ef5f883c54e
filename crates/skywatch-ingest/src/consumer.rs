//! The stream consumer loop.
//!
//! Pulls one message at a time from a [`MessageStream`], awaits the handler,
//! then acknowledges the message before pulling the next. Awaiting the
//! handler before the next pull is what keeps per-partition order.
//!
//! Failure policy:
//! - message-local handler errors are logged with the message position,
//!   counted, and the loop moves on (the message is still acknowledged)
//! - fatal handler errors (see [`crate::Error::is_fatal`], e.g. a closed index
//!   queue) end the loop without acknowledging, so the message is redelivered
//!   to the next consumer instead of being lost
//! - transport errors from the source end the loop with an error, as do
//!   failures to acknowledge a message
//!
//! The loop also stops when the shared running flag is cleared. Polls are
//! bounded by the poll interval so the flag is observed while the log is idle.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::Result;
use crate::source::{MessageStream, StreamMessage};

/// Default upper bound on a single poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often progress is logged, in messages.
const PROGRESS_INTERVAL: u64 = 10_000;

/// What the handler did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Decoded and passed downstream.
    Processed {
        /// Whether an alert was published for it.
        alerted: bool,
    },
    /// Payload did not decode; consumed and skipped.
    Malformed,
}

/// Per-message callback driven by [`StreamConsumer::run`].
pub trait MessageHandler {
    /// Handle one message. Non-fatal errors are logged by the consumer and
    /// the loop continues; fatal ones stop it before the message is acked.
    fn handle(&self, message: &StreamMessage) -> impl Future<Output = Result<Disposition>>;
}

/// Statistics from a consumer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages pulled from the source.
    pub received: u64,

    /// Messages decoded and passed downstream.
    pub processed: u64,

    /// Processed messages that triggered an alert.
    pub alerted: u64,

    /// Messages skipped because the payload did not decode.
    pub malformed: u64,

    /// Messages whose handler returned an error.
    pub failed: u64,
}

/// Drives a [`MessageStream`] through a [`MessageHandler`].
pub struct StreamConsumer<S> {
    source: S,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl<S: MessageStream> StreamConsumer<S> {
    /// Create a consumer over `source`. It starts in the running state.
    pub fn new(source: S) -> Self {
        Self {
            source,
            running: Arc::new(AtomicBool::new(true)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Share an externally owned running flag (e.g. one set by a signal
    /// handler installed before the source was connected).
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Override the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Handle to the running flag for shutdown signaling.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Ask the loop to stop after the current message.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Consume until the source is exhausted, the running flag is cleared, or
    /// the source fails.
    pub async fn run<H: MessageHandler>(&mut self, handler: &H) -> Result<ConsumerStats> {
        let mut stats = ConsumerStats::default();
        let start = Instant::now();

        tracing::info!(source = self.source.name(), "Starting consumer loop");
        metrics::gauge!("ingest_running").set(1.0);

        let result = self.consume(handler, &mut stats).await;

        metrics::gauge!("ingest_running").set(0.0);
        tracing::info!(
            source = self.source.name(),
            received = stats.received,
            processed = stats.processed,
            alerted = stats.alerted,
            malformed = stats.malformed,
            failed = stats.failed,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Consumer loop stopped"
        );

        result.map(|()| stats)
    }

    async fn consume<H: MessageHandler>(
        &mut self,
        handler: &H,
        stats: &mut ConsumerStats,
    ) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            let message =
                match tokio::time::timeout(self.poll_interval, self.source.next_message()).await {
                    // Idle; go round and re-check the flag.
                    Err(_) => continue,
                    Ok(Ok(Some(message))) => message,
                    Ok(Ok(None)) => {
                        tracing::info!(source = self.source.name(), "Source exhausted");
                        return Ok(());
                    }
                    Ok(Err(e)) => {
                        tracing::error!(
                            source = self.source.name(),
                            error = %e,
                            "Source failed, stopping consumer"
                        );
                        return Err(e);
                    }
                };

            stats.received += 1;
            metrics::counter!("ingest_messages_total").increment(1);

            match handler.handle(&message).await {
                Ok(Disposition::Processed { alerted }) => {
                    stats.processed += 1;
                    if alerted {
                        stats.alerted += 1;
                    }
                }
                Ok(Disposition::Malformed) => stats.malformed += 1,
                Err(e) => {
                    stats.failed += 1;
                    metrics::counter!("ingest_handler_errors_total").increment(1);
                    if e.is_fatal() {
                        tracing::error!(
                            position = %message.position(),
                            error = %e,
                            "Fatal error processing message, stopping consumer unacked"
                        );
                        return Err(e);
                    }
                    tracing::error!(
                        position = %message.position(),
                        error = %e,
                        "Error processing message"
                    );
                }
            }

            self.source.ack(&message)?;

            if stats.received % PROGRESS_INTERVAL == 0 {
                tracing::info!(
                    received = stats.received,
                    alerted = stats.alerted,
                    malformed = stats.malformed,
                    failed = stats.failed,
                    "Consumer progress"
                );
            }
        }

        tracing::info!("Running flag cleared, stopping consumer");
        Ok(())
    }
}
