//! cowrite storage backends
//!
//! Document servers read a document's bytes when they start and write them
//! back when they are torn down. Backends:
//! - Memory (default): Fast, volatile storage
//! - Volume: One file per document in a directory
//! - SQLite: Embedded persistence

pub mod memory;
pub mod volume;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use cowrite_core::DocumentId;

/// Storage backend trait
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a document's stored bytes, `None` if it was never written
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace a document's stored bytes
    async fn truncate_and_write(&self, id: &DocumentId, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a document, `false` if nothing was stored
    async fn delete(&self, id: &DocumentId) -> Result<bool, StorageError>;

    /// Flush and release backend resources
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

pub use memory::MemoryStorage;
pub use volume::VolumeStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
