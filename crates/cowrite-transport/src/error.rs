//! Transport error types

use cowrite_protocol::ProtocolError;
use cowrite_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Core error: {0}")]
    Core(#[from] cowrite_core::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad request path: {0}")]
    BadRequestPath(String),

    #[error("Document server for {0} has shut down")]
    Retired(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
