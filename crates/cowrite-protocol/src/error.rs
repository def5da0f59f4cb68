//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Unsupported request: {request_type} on a {kind} target")]
    UnsupportedRequest { request_type: String, kind: String },

    #[error("Invalid {kind} data '{data}': {reason}")]
    InvalidData {
        kind: String,
        data: String,
        reason: String,
    },

    #[error("Missing argument: {0}")]
    MissingArgument(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::InvalidJson(e.to_string())
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
