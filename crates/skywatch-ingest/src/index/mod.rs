//! Search index gateway.
//!
//! [`SearchIndex`] is the seam between the pipeline and the search cluster:
//! production uses [`ElasticIndex`], tests use an in-memory recorder.
//! Documents reach the index through the [`IndexWorkerPool`], so the
//! consumer loop never waits on an index round-trip.

mod elastic;
mod pool;

pub use elastic::{ClusterInfo, ClusterVersion, ElasticConfig, ElasticIndex, default_mappings};
pub use pool::{
    IndexJob, IndexOutcome, IndexPoolConfig, IndexQueue, IndexWorkerPool, IndexerStats,
    log_outcomes,
};

use std::future::Future;

use crate::Result;

/// Answer to a single document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResponse {
    /// HTTP status of the write.
    pub status: u16,

    /// Document id, assigned by the cluster when none was supplied.
    pub id: String,

    /// Write result as reported by the cluster (`created`, `updated`, ...).
    pub result: String,
}

/// A named document index.
pub trait SearchIndex: Send + Sync + 'static {
    /// Whether `index` exists.
    fn index_exists(&self, index: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Create `index` with the default mappings. Creating an index that
    /// already exists is not an error.
    fn create_index(&self, index: &str) -> impl Future<Output = Result<()>> + Send;

    /// Write `body` (a serialized JSON document) to `index`.
    ///
    /// With an `id`, the write replaces any document with that id; without,
    /// the cluster assigns a fresh one.
    fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        body: &str,
    ) -> impl Future<Output = Result<IndexResponse>> + Send;
}

/// Make sure `name` exists, creating it if absent.
///
/// Returns whether the index was created. Failure here is a startup error.
pub async fn ensure_index<I: SearchIndex>(index: &I, name: &str) -> Result<bool> {
    if index.index_exists(name).await? {
        tracing::info!(index = %name, "Index already exists");
        return Ok(false);
    }

    index.create_index(name).await?;
    tracing::info!(index = %name, "Index created");
    Ok(true)
}
