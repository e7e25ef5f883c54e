//! Core types and shared utilities for the Skywatch ingestion pipeline.
//!
//! This crate provides:
//! - The [`CosmicEvent`] record and its validated decoding
//! - A bounded backoff [`RetryPolicy`] shared by every connection routine
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
pub mod event;
pub mod metrics;
pub mod retry;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Name of the real-time channel alerts are published on.
pub const ALERT_CHANNEL: &str = "alert";

pub use error::{Error, Result};
pub use event::{
    CosmicEvent, Declination, EventSource, EventType, MAX_URGENCY, MIN_URGENCY, RightAscension,
    Urgency,
};
pub use retry::RetryPolicy;
