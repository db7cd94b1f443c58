//! Rollcall Error Types

use thiserror::Error;

/// Result type alias for rollcall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Rollcall error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Codec errors
    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    // Protocol errors
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Missing field '{field}' for service {service}")]
    MissingField { service: String, field: &'static str },

    #[error("Unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: String, got: String },

    #[error("Peer reported error: {0}")]
    Remote(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Frame of {length} bytes exceeds the {limit} byte limit (unframed or oversized input)")]
    FrameTooLarge { length: u32, limit: u32 },

    // Directory errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Coordination errors
    #[error("Task queue full, dropped {0}")]
    QueueFull(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
        )
    }

    /// Check if this error came from the codec layer
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Error::MsgPackDecode(_) | Error::Json(_) | Error::InvalidPayload(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ConnectionTimeout("a:1".into()).is_retryable());
        assert!(Error::ConnectionFailed {
            address: "a:1".into(),
            reason: "refused".into(),
        }
        .is_retryable());
        assert!(!Error::UnknownService("x".into()).is_retryable());
        assert!(!Error::ShuttingDown.is_retryable());
    }

    #[test]
    fn test_decode_classification() {
        assert!(Error::InvalidPayload("bad".into()).is_decode_error());
        assert!(!Error::Network("bad".into()).is_decode_error());
        assert!(!Error::FrameTooLarge { length: 1 << 30, limit: 1 << 24 }.is_decode_error());
    }
}
