//! Error types for the telemetry queue.
//!
//! None of these ever reach a `track` or profile call site. They travel
//! through the flush and persistence paths, where they are logged and folded
//! into a [`FlushReport`](crate::flush::FlushReport).

use std::time::Duration;

use thiserror::Error;

/// Result type for fallible crate operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Result type for a single network attempt
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised inside the telemetry subsystem
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A batch could not be delivered; it stays queued for the next cycle
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The backend refused a batch as malformed; it is dropped
    #[error("backend rejected batch of {count} record(s): {reason}")]
    BackendRejection { count: usize, reason: String },

    /// A store was full and evicted its oldest record
    #[error("store '{store}' at capacity {capacity}, oldest record evicted")]
    StoreCapacityExceeded { store: &'static str, capacity: usize },

    /// A single record could not be turned into its wire form
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A property value outside the accepted set
    #[error("invalid property '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },

    /// Reading or writing persisted state failed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Configuration is invalid or missing
    #[error("config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for TelemetryError {
    fn from(e: std::io::Error) -> Self {
        TelemetryError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(e: serde_json::Error) -> Self {
        TelemetryError::Persistence(format!("JSON: {}", e))
    }
}

impl TelemetryError {
    /// Shorthand for an [`TelemetryError::InvalidProperty`]
    pub fn invalid_property(key: impl Into<String>, reason: impl Into<String>) -> Self {
        TelemetryError::InvalidProperty {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of one network round trip. Always retried on the next cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No response before the deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, DNS failure, reset, ...
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server answered with a 5xx status
    #[error("server error: HTTP {0}")]
    Server(u16),

    /// 2xx status but a body that is neither `1` nor `0`
    #[error("unexpected response body: {0:?}")]
    UnexpectedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts() {
        let err: TelemetryError = TransportError::Server(503).into();
        assert!(matches!(err, TelemetryError::Transport(TransportError::Server(503))));
        assert_eq!(err.to_string(), "transport error: server error: HTTP 503");
    }

    #[test]
    fn test_io_error_is_persistence() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: TelemetryError = io.into();
        assert!(matches!(err, TelemetryError::Persistence(msg) if msg.contains("denied")));
    }
}
