//! Index worker pool.
//!
//! Decouples the consumer loop from search-cluster latency:
//!
//! ```text
//! IndexQueue::submit ──► bounded queue ──► dispatcher ──► ≤ N workers ──► SearchIndex
//!                                                              │
//!                                   log_outcomes ◄── outcomes ◄┘
//! ```
//!
//! `submit` only waits when the queue is full, which is the pipeline's one
//! steady-state backpressure point. Results never flow back to the submitter;
//! they arrive on the outcome channel and are logged there.
//!
//! Shutdown: once every [`IndexQueue`] clone is dropped the dispatcher stops
//! taking work, waits for in-flight writes, and [`IndexWorkerPool::shutdown`]
//! returns the totals.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use super::{IndexResponse, SearchIndex};
use crate::source::MessagePosition;
use crate::{Error, Result};

/// Pool sizing.
#[derive(Debug, Clone)]
pub struct IndexPoolConfig {
    /// Target index name.
    pub index: String,

    /// Maximum concurrent index requests.
    pub workers: usize,

    /// Jobs buffered before `submit` waits.
    pub queue_capacity: usize,
}

impl Default for IndexPoolConfig {
    fn default() -> Self {
        Self {
            index: "cosmic-events".to_string(),
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// One document waiting to be written.
#[derive(Debug, Clone)]
pub struct IndexJob {
    /// Where the source message sat in the log.
    pub position: MessagePosition,

    /// Document id to write under; `None` lets the cluster assign one.
    pub document_id: Option<String>,

    /// Verbatim message body.
    pub body: Arc<str>,
}

/// Result of one index request.
#[derive(Debug)]
pub struct IndexOutcome {
    pub position: MessagePosition,
    pub document_id: Option<String>,
    pub result: Result<IndexResponse>,
    pub elapsed: Duration,
}

/// Totals for a pool's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerStats {
    /// Documents the index accepted.
    pub documents_indexed: u64,

    /// Index requests that failed.
    pub documents_failed: u64,
}

/// Submission handle for the pool.
#[derive(Debug, Clone)]
pub struct IndexQueue {
    sender: mpsc::Sender<IndexJob>,
}

impl IndexQueue {
    /// Enqueue a job, waiting only while the queue is full.
    pub async fn submit(&self, job: IndexJob) -> Result<()> {
        self.sender.send(job).await.map_err(|_| Error::QueueClosed)?;
        metrics::gauge!("index_queue_depth").set(self.depth() as f64);
        Ok(())
    }

    /// Jobs currently buffered.
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// A queue whose dispatcher is already gone.
    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        let (sender, _) = mpsc::channel(1);
        Self { sender }
    }
}

#[derive(Default)]
struct Counters {
    indexed: AtomicU64,
    failed: AtomicU64,
}

/// Running pool; owns the dispatcher task.
pub struct IndexWorkerPool {
    dispatcher: JoinHandle<IndexerStats>,
}

impl IndexWorkerPool {
    /// Start the dispatcher.
    ///
    /// Returns the pool, its submission queue, and the outcome channel. The
    /// outcome receiver should be drained (see [`log_outcomes`]); outcomes
    /// are dropped silently once it is gone.
    pub fn start<I: SearchIndex>(
        index: Arc<I>,
        config: IndexPoolConfig,
    ) -> (Self, IndexQueue, mpsc::UnboundedReceiver<IndexOutcome>) {
        let workers = config.workers.max(1);
        let (sender, jobs) = mpsc::channel(config.queue_capacity.max(1));
        let (outcomes, outcome_rx) = mpsc::unbounded_channel();

        tracing::info!(
            "Index worker pool started: index={}, workers={}, queue={}",
            config.index,
            workers,
            sender.max_capacity()
        );

        let dispatcher = tokio::spawn(dispatch(
            index,
            Arc::from(config.index.as_str()),
            workers,
            jobs,
            outcomes,
        ));

        (Self { dispatcher }, IndexQueue { sender }, outcome_rx)
    }

    /// Wait for the pool to drain and return its totals.
    ///
    /// Every [`IndexQueue`] clone must be dropped first, otherwise this
    /// waits forever.
    pub async fn shutdown(self) -> IndexerStats {
        match self.dispatcher.await {
            Ok(stats) => {
                tracing::info!(
                    indexed = stats.documents_indexed,
                    failed = stats.documents_failed,
                    "Index worker pool drained"
                );
                stats
            }
            Err(e) => {
                tracing::error!(error = %e, "Index dispatcher failed");
                IndexerStats::default()
            }
        }
    }
}

async fn dispatch<I: SearchIndex>(
    index: Arc<I>,
    index_name: Arc<str>,
    workers: usize,
    mut jobs: mpsc::Receiver<IndexJob>,
    outcomes: mpsc::UnboundedSender<IndexOutcome>,
) -> IndexerStats {
    let permits = Arc::new(Semaphore::new(workers));
    let counters = Arc::new(Counters::default());
    let mut in_flight = JoinSet::new();

    while let Some(job) = jobs.recv().await {
        metrics::gauge!("index_queue_depth").set(jobs.len() as f64);

        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };

        // Reap finished workers so the set doesn't grow unbounded.
        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                tracing::error!(error = %e, "Index worker panicked");
            }
        }

        let index = Arc::clone(&index);
        let index_name = Arc::clone(&index_name);
        let counters = Arc::clone(&counters);
        let outcomes = outcomes.clone();

        in_flight.spawn(async move {
            let _permit = permit;
            let start = Instant::now();
            let result = index
                .index_document(&index_name, job.document_id.as_deref(), &job.body)
                .await;
            let elapsed = start.elapsed();

            metrics::histogram!("index_request_duration_seconds").record(elapsed.as_secs_f64());
            match &result {
                Ok(_) => {
                    counters.indexed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("index_documents_total").increment(1);
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("index_errors_total").increment(1);
                }
            }

            let _ = outcomes.send(IndexOutcome {
                position: job.position,
                document_id: job.document_id,
                result,
                elapsed,
            });
        });
    }

    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            tracing::error!(error = %e, "Index worker panicked");
        }
    }
    metrics::gauge!("index_queue_depth").set(0.0);

    IndexerStats {
        documents_indexed: counters.indexed.load(Ordering::Relaxed),
        documents_failed: counters.failed.load(Ordering::Relaxed),
    }
}

/// Log every outcome until the pool's outcome channel closes.
pub async fn log_outcomes(mut outcomes: mpsc::UnboundedReceiver<IndexOutcome>) -> IndexerStats {
    let mut stats = IndexerStats::default();

    while let Some(outcome) = outcomes.recv().await {
        match &outcome.result {
            Ok(response) => {
                stats.documents_indexed += 1;
                tracing::debug!(
                    position = %outcome.position,
                    id = %response.id,
                    status = response.status,
                    result = %response.result,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Insert result"
                );
            }
            Err(e) => {
                stats.documents_failed += 1;
                tracing::error!(
                    position = %outcome.position,
                    document_id = outcome.document_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Insert error"
                );
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingIndex;

    fn job(offset: i64, id: Option<&str>) -> IndexJob {
        IndexJob {
            position: MessagePosition {
                topic: "cosmic-events-topic".to_string(),
                partition: 0,
                offset,
            },
            document_id: id.map(str::to_string),
            body: Arc::from(format!("{{\"offset\":{offset}}}")),
        }
    }

    fn config(workers: usize, queue_capacity: usize) -> IndexPoolConfig {
        IndexPoolConfig {
            index: "cosmic-events".to_string(),
            workers,
            queue_capacity,
        }
    }

    #[tokio::test]
    async fn test_every_job_indexed_once() {
        let index = Arc::new(RecordingIndex::new());
        let (pool, queue, outcomes) = IndexWorkerPool::start(Arc::clone(&index), config(2, 8));

        for offset in 0..5 {
            queue.submit(job(offset, Some(&format!("doc-{offset}")))).await.unwrap();
        }
        drop(queue);

        let stats = pool.shutdown().await;
        let logged = log_outcomes(outcomes).await;

        assert_eq!(stats.documents_indexed, 5);
        assert_eq!(stats.documents_failed, 0);
        assert_eq!(logged, stats);

        let mut documents = index.documents();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(documents.len(), 5);
        assert_eq!(documents[0].index, "cosmic-events");
        assert_eq!(documents[0].id.as_deref(), Some("doc-0"));
        assert_eq!(documents[0].body, "{\"offset\":0}");
    }

    #[tokio::test]
    async fn test_failures_reach_outcome_channel() {
        let index = Arc::new(RecordingIndex::new().failing_documents());
        let (pool, queue, outcomes) = IndexWorkerPool::start(index, config(4, 8));

        queue.submit(job(7, None)).await.unwrap();
        drop(queue);

        let stats = pool.shutdown().await;
        assert_eq!(stats.documents_failed, 1);

        let logged = log_outcomes(outcomes).await;
        assert_eq!(logged.documents_failed, 1);
        assert_eq!(logged.documents_indexed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_by_workers() {
        let index = Arc::new(RecordingIndex::new().with_latency(Duration::from_millis(100)));
        let (pool, queue, outcomes) = IndexWorkerPool::start(Arc::clone(&index), config(3, 32));

        for offset in 0..12 {
            queue.submit(job(offset, None)).await.unwrap();
        }
        drop(queue);
        drop(outcomes);

        let stats = pool.shutdown().await;
        assert_eq!(stats.documents_indexed, 12);
        assert_eq!(index.max_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_submit_after_close_fails() {
        let queue = IndexQueue::closed();

        let err = queue.submit(job(0, None)).await.unwrap_err();
        assert!(matches!(err, Error::QueueClosed));
    }

    #[tokio::test]
    async fn test_zero_sizes_are_clamped() {
        let index = Arc::new(RecordingIndex::new());
        let (pool, queue, _outcomes) = IndexWorkerPool::start(index, config(0, 0));

        queue.submit(job(0, None)).await.unwrap();
        drop(queue);

        assert_eq!(pool.shutdown().await.documents_indexed, 1);
    }
}
