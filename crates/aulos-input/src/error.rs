//! Error types for the HTTP input core
//!
//! Centralized error handling using thiserror. Errors raised on the I/O
//! thread are stored in a stream's postponed slot and surfaced by the next
//! consumer-side operation on that stream.

use thiserror::Error;

/// Main error type for the HTTP streaming input.
///
/// The enum is `Clone` because an engine-wide failure distributes one error
/// to every active stream.
#[derive(Error, Debug, Clone)]
pub enum InputError {
    /// Global engine initialization failed.
    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    /// A call into the shared transfer engine failed.
    #[error("transfer engine failed: {0}")]
    Engine(String),

    /// Per-transfer setup failed (client build, worker spawn).
    #[error("transfer setup failed: {0}")]
    Transfer(String),

    /// The transfer finished with an error; carries the backend's text.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The transfer finished, but the HTTP status was not a success.
    #[error("got HTTP status {0}")]
    HttpStatus(u16),

    /// A range request issued for a seek was rejected by the server.
    #[error("range request rejected with HTTP status {0}")]
    RangeRejected(u16),

    /// The stream does not support seeking.
    #[error("stream is not seekable")]
    NotSeekable,

    /// The seek target cannot be resolved.
    #[error("invalid seek target: {0}")]
    InvalidSeek(&'static str),

    /// A configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for the HTTP input core
pub type Result<T> = std::result::Result<T, InputError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_message_carries_code() {
        let err = InputError::HttpStatus(404);
        assert_eq!(err.to_string(), "got HTTP status 404");
    }

    #[test]
    fn range_rejected_is_distinct_from_http_status() {
        let a = InputError::HttpStatus(416).to_string();
        let b = InputError::RangeRejected(416).to_string();
        assert_ne!(a, b);
        assert!(b.contains("416"));
    }

    #[test]
    fn transfer_failed_carries_backend_text() {
        let err = InputError::TransferFailed("connection reset".to_string());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn errors_are_cloneable() {
        let err = InputError::Engine("progress failed".to_string());
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
