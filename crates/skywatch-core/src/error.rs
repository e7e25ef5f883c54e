//! Error types shared by the Skywatch pipeline crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding events or talking to backends.
#[derive(Error, Debug)]
pub enum Error {
    /// JSON parsing or encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event has a field outside its allowed domain (e.g., urgency 9).
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// A connection routine gave up after its retry budget was spent.
    ///
    /// This is the transport-fatal case: the owning process must stop rather
    /// than continue half-connected.
    #[error("{what} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// What was being attempted (e.g., "kafka connect").
        what: &'static str,
        /// Total attempts made, including the first.
        attempts: u32,
        /// Display form of the last error observed.
        last_error: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means a connection budget is spent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}
