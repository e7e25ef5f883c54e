//! Real-time alert fan-out.
//!
//! [`AlertBroadcaster`] keeps a registry of subscribers, each with its own
//! bounded buffer. Publishing snapshots the registry and hands every
//! subscriber a copy with `try_send`, so the publisher never waits:
//!
//! - a full buffer drops that one alert for that one subscriber
//! - a closed subscriber is pruned from the registry
//!
//! Neither outcome affects the other subscribers. Alerts are transient; a
//! subscriber that connects late does not see earlier alerts.
//!
//! [`server`] exposes the broadcaster to WebSocket clients.

pub mod server;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Default per-subscriber buffer, in alerts.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Identifier of a registered subscriber.
pub type SubscriberId = u64;

/// One published alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Channel name (e.g. [`skywatch_core::ALERT_CHANNEL`]).
    pub channel: Arc<str>,

    /// Verbatim message body.
    pub payload: Arc<str>,
}

/// What happened to a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers whose buffer accepted the alert.
    pub delivered: usize,

    /// Subscribers whose buffer was full.
    pub dropped: usize,

    /// Disconnected subscribers removed during this publish.
    pub pruned: usize,
}

/// Registry of alert subscribers.
pub struct AlertBroadcaster {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Alert>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl AlertBroadcaster {
    /// Create a broadcaster giving each subscriber `buffer` slots.
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        })
    }

    /// Register a subscriber. Dropping the returned handle unregisters it.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);

        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, sender);
            subscribers.len()
        };
        metrics::gauge!("alert_subscribers").set(count as f64);
        tracing::debug!(subscriber = id, subscribers = count, "Alert subscriber registered");

        Subscription {
            id,
            receiver,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Push `payload` to every current subscriber on `channel`.
    ///
    /// Never blocks. With no subscribers this is a no-op.
    pub fn publish(&self, channel: &str, payload: Arc<str>) -> PublishReport {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Alert>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        let mut report = PublishReport::default();
        if snapshot.is_empty() {
            return report;
        }

        let alert = Alert {
            channel: Arc::from(channel),
            payload,
        };

        let mut closed = Vec::new();
        for (id, sender) in snapshot {
            match sender.try_send(alert.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    report.dropped += 1;
                    tracing::warn!(subscriber = id, channel, "Subscriber buffer full, alert dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &closed {
                if subscribers.remove(id).is_some() {
                    report.pruned += 1;
                }
            }
            metrics::gauge!("alert_subscribers").set(subscribers.len() as f64);
        }

        metrics::counter!("alerts_published_total").increment(1);
        metrics::counter!("alerts_delivered_total").increment(report.delivered as u64);
        metrics::counter!("alerts_dropped_total").increment(report.dropped as u64);

        report
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.write();
        if subscribers.remove(&id).is_some() {
            metrics::gauge!("alert_subscribers").set(subscribers.len() as f64);
            tracing::debug!(subscriber = id, "Alert subscriber unregistered");
        }
    }
}

/// Receiving end of one subscriber's buffer.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Alert>,
    broadcaster: Weak<AlertBroadcaster>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next alert. `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Alert> {
        self.receiver.recv().await
    }

    /// Take a buffered alert without waiting.
    pub fn try_recv(&mut self) -> Option<Alert> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.id);
        }
    }
}
