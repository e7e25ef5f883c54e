//! Prometheus metrics helpers for the Skywatch system.
//!
//! # Usage
//!
//! ```rust,ignore
//! use skywatch_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("ingest_messages_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`ingest_`, `alerts_`, `index_`, `cache_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: used sparingly to avoid cardinality explosion

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Binds `0.0.0.0:port` and serves `/metrics` from a background task. Bind
/// failures are returned; the server itself runs until the process exits.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

/// Register descriptions for the metrics recorded across Skywatch.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Stream consumer
    // =========================================================================

    describe_counter!("ingest_messages_total", "Messages received from the broker");
    describe_counter!(
        "ingest_messages_malformed_total",
        "Messages skipped because the payload did not decode"
    );
    describe_counter!(
        "ingest_urgency_out_of_range_total",
        "Events indexed without alerting because urgency was outside 1-5"
    );
    describe_counter!(
        "ingest_handler_errors_total",
        "Messages whose handler returned an error"
    );
    describe_gauge!(
        "ingest_running",
        "Whether the consumer loop is running (1=yes, 0=no)"
    );

    // =========================================================================
    // Alerts
    // =========================================================================

    describe_counter!("alerts_published_total", "Alerts published to subscribers");
    describe_counter!(
        "alerts_delivered_total",
        "Alert deliveries accepted by subscriber buffers"
    );
    describe_counter!(
        "alerts_dropped_total",
        "Alert deliveries dropped because a subscriber buffer was full"
    );
    describe_gauge!("alert_subscribers", "Connected alert subscribers");

    // =========================================================================
    // Search index
    // =========================================================================

    describe_counter!("index_documents_total", "Documents accepted by the index");
    describe_counter!("index_errors_total", "Failed index requests");
    describe_gauge!("index_queue_depth", "Documents waiting for an index worker");
    describe_histogram!(
        "index_request_duration_seconds",
        "Time spent on a single index request"
    );

    // =========================================================================
    // Cache
    // =========================================================================

    describe_counter!("cache_hits_total", "Cache lookups that returned a value");
    describe_counter!("cache_misses_total", "Cache lookups that missed");
    describe_counter!(
        "cache_errors_total",
        "Cache backend failures (label: op)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }
}
