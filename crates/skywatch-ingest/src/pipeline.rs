//! Per-message event handling.
//!
//! For every consumed message [`EventPipeline`]:
//!
//! 1. Decodes the payload as a [`CosmicEvent`]. Undecodable payloads are
//!    logged, counted, and consumed without retry.
//! 2. Publishes the verbatim body on the alert channel when the event's
//!    urgency exceeds the threshold. An urgency outside `[1, 5]` never
//!    alerts, but the event is still indexed.
//! 3. Submits the verbatim body to the index queue.
//!
//! Alerting happens before indexing so a slow or failing index never delays
//! an alert. Index results are only observed on the pool's outcome channel.

use std::sync::Arc;

use skywatch_core::{ALERT_CHANNEL, CosmicEvent, Urgency};

use crate::Result;
use crate::alert::AlertBroadcaster;
use crate::consumer::{Disposition, MessageHandler};
use crate::index::{IndexJob, IndexQueue};
use crate::source::StreamMessage;

/// Pipeline behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Events with urgency strictly above this are alerted.
    pub alert_threshold: Urgency,

    /// Write documents under [`CosmicEvent::document_id`] so redelivery
    /// overwrites instead of duplicating.
    pub document_ids: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            alert_threshold: Urgency::ROUTINE,
            document_ids: true,
        }
    }
}

/// The [`MessageHandler`] wiring alerts and indexing together.
pub struct EventPipeline {
    alerts: Arc<AlertBroadcaster>,
    index: IndexQueue,
    config: PipelineConfig,
}

impl EventPipeline {
    pub fn new(alerts: Arc<AlertBroadcaster>, index: IndexQueue, config: PipelineConfig) -> Self {
        Self {
            alerts,
            index,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl MessageHandler for EventPipeline {
    async fn handle(&self, message: &StreamMessage) -> Result<Disposition> {
        let event = match CosmicEvent::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!("ingest_messages_malformed_total").increment(1);
                tracing::warn!(
                    position = %message.position(),
                    error = %e,
                    "Dropping malformed message"
                );
                return Ok(Disposition::Malformed);
            }
        };

        // A successful JSON decode implies valid UTF-8.
        let body: Arc<str> = match std::str::from_utf8(&message.payload) {
            Ok(body) => Arc::from(body),
            Err(e) => {
                metrics::counter!("ingest_messages_malformed_total").increment(1);
                tracing::warn!(position = %message.position(), error = %e, "Dropping non-UTF-8 message");
                return Ok(Disposition::Malformed);
            }
        };

        if event.urgency().is_none() {
            metrics::counter!("ingest_urgency_out_of_range_total").increment(1);
            tracing::debug!(
                position = %message.position(),
                urgency = event.urgency_level,
                "Urgency out of range, indexing without alert"
            );
        }

        let alerted = event.triggers_alert(self.config.alert_threshold);
        if alerted {
            let report = self.alerts.publish(ALERT_CHANNEL, Arc::clone(&body));
            tracing::debug!(
                position = %message.position(),
                urgency = event.urgency_level,
                delivered = report.delivered,
                dropped = report.dropped,
                "Alert published"
            );
        }

        let document_id = self.config.document_ids.then(|| event.document_id());
        self.index
            .submit(IndexJob {
                position: message.position(),
                document_id,
                body,
            })
            .await?;

        Ok(Disposition::Processed { alerted })
    }
}
