//! In-memory fakes shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::index::{IndexResponse, SearchIndex};
use crate::source::{MessageStream, StreamMessage};
use crate::{Error, Result};

pub(crate) const TEST_TOPIC: &str = "cosmic-events-topic";

/// A serialized event with the given urgency and title.
pub(crate) fn event_json(urgency: i64, title: &str) -> String {
    serde_json::json!({
        "eventTS": 1_718_031_000_000_i64,
        "eventSource": "Very Large Telescope",
        "ra": { "ra_val": "13.45", "ra_pm": "0.1" },
        "dec": { "dec_val": "-45.6", "dec_pm": "0.05" },
        "eventType": "GRB",
        "title": title,
        "urgency": urgency
    })
    .to_string()
}

/// A message at `offset` on the test topic.
pub(crate) fn message(offset: i64, payload: impl Into<Vec<u8>>) -> StreamMessage {
    StreamMessage::new(TEST_TOPIC, 0, offset, payload)
}

// ═══════════════════════════════════════════════════════════════════════════
// Message source
// ═══════════════════════════════════════════════════════════════════════════

enum Step {
    Deliver(StreamMessage),
    Fail(String),
}

/// Source that replays a fixed script, then ends (or idles forever).
pub(crate) struct ScriptedStream {
    script: VecDeque<Step>,
    acked: Vec<i64>,
    idle_when_done: bool,
}

impl ScriptedStream {
    pub(crate) fn from_payloads<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        let script = payloads
            .into_iter()
            .enumerate()
            .map(|(offset, payload)| Step::Deliver(message(offset as i64, payload)))
            .collect();
        Self {
            script,
            acked: Vec::new(),
            idle_when_done: false,
        }
    }

    /// A source that never yields.
    pub(crate) fn idle() -> Self {
        Self {
            script: VecDeque::new(),
            acked: Vec::new(),
            idle_when_done: true,
        }
    }

    /// Append a transport failure after the scripted messages.
    pub(crate) fn then_fail(mut self, reason: &str) -> Self {
        self.script.push_back(Step::Fail(reason.to_string()));
        self
    }

    pub(crate) fn acked(&self) -> Vec<i64> {
        self.acked.clone()
    }
}

impl MessageStream for ScriptedStream {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        match self.script.pop_front() {
            Some(Step::Deliver(message)) => Ok(Some(message)),
            Some(Step::Fail(reason)) => Err(Error::Transport(reason)),
            None if self.idle_when_done => std::future::pending().await,
            None => Ok(None),
        }
    }

    fn ack(&mut self, message: &StreamMessage) -> Result<()> {
        self.acked.push(message.offset);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Search index
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedDocument {
    pub index: String,
    pub id: Option<String>,
    pub body: String,
}

/// Index that keeps everything in memory and records every call.
#[derive(Default)]
pub(crate) struct RecordingIndex {
    existing: Mutex<HashSet<String>>,
    created: Mutex<Vec<String>>,
    documents: Mutex<Vec<RecordedDocument>>,
    exists_checks: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_creates: bool,
    fail_documents: bool,
    latency: Option<Duration>,
}

impl RecordingIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_existing(name: &str) -> Self {
        let index = Self::new();
        index.existing.lock().insert(name.to_string());
        index
    }

    pub(crate) fn failing_creates(mut self) -> Self {
        self.fail_creates = true;
        self
    }

    pub(crate) fn failing_documents(mut self) -> Self {
        self.fail_documents = true;
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(crate) fn exists_checks(&self) -> usize {
        self.exists_checks.load(Ordering::SeqCst)
    }

    pub(crate) fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }

    pub(crate) fn documents(&self) -> Vec<RecordedDocument> {
        self.documents.lock().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl SearchIndex for RecordingIndex {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.exists_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.existing.lock().contains(index))
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        if self.fail_creates {
            return Err(Error::Elastic {
                status: 500,
                body: "cluster_block_exception".to_string(),
            });
        }
        self.created.lock().push(index.to_string());
        self.existing.lock().insert(index.to_string());
        Ok(())
    }

    async fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        body: &str,
    ) -> Result<IndexResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_documents {
            return Err(Error::Elastic {
                status: 400,
                body: "mapper_parsing_exception".to_string(),
            });
        }

        let mut documents = self.documents.lock();
        let replaced = id.is_some() && documents.iter().any(|d| d.id.as_deref() == id);
        documents.push(RecordedDocument {
            index: index.to_string(),
            id: id.map(str::to_string),
            body: body.to_string(),
        });

        Ok(IndexResponse {
            status: if replaced { 200 } else { 201 },
            id: id
                .map(str::to_string)
                .unwrap_or_else(|| format!("auto-{}", documents.len())),
            result: if replaced { "updated" } else { "created" }.to_string(),
        })
    }
}
