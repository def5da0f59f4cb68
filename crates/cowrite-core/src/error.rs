//! Error types for cowrite core

use crate::operation::ClientId;
use thiserror::Error;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Index out of range: {index} >= {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Transform conflict: {0}")]
    TransformConflict(String),

    #[error("Document is locked: {0}")]
    DocumentLocked(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),

    #[error("Invalid document ID: {0}")]
    InvalidDocumentId(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub(crate) fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Errors that reject a single operation while leaving the session open.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::InvalidPath(_)
                | Error::IndexOutOfRange { .. }
                | Error::TypeMismatch { .. }
                | Error::TransformConflict(_)
                | Error::InvalidOperation(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias for cowrite core operations
pub type Result<T> = std::result::Result<T, Error>;
