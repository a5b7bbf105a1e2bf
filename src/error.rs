//! Error types for the event bus.

use thiserror::Error;

/// Main error type for bus, stream and producer operations.
///
/// Publishing, subscribing and unsubscribing never fail; errors only come
/// from parsing client input, writing frames, and running change monitors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Change source '{source_name}' failed: {message}")]
    SourceFailed {
        source_name: String,
        message: String,
    },

    #[error("Listener for {event_type} failed: {message}")]
    Listener { event_type: String, message: String },

    #[error("Monitor thread '{0}' panicked")]
    MonitorPanicked(String),
}

impl BusError {
    /// Whether the error was caused by bad client input (maps to HTTP 400).
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            BusError::InvalidTimestamp(_) | BusError::UnknownEventType(_)
        )
    }
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
