//! In-memory storage backend

use crate::{Storage, StorageError};
use async_trait::async_trait;
use cowrite_core::DocumentId;
use dashmap::DashMap;

/// In-memory storage backend
///
/// Fast, volatile storage suitable for development and tests.
/// Data is lost when the process exits.
pub struct MemoryStorage {
    /// Document bytes by id
    data: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(id.as_str()).map(|entry| entry.value().clone()))
    }

    async fn truncate_and_write(&self, id: &DocumentId, data: &[u8]) -> Result<(), StorageError> {
        self.data.insert(id.as_str().to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, id: &DocumentId) -> Result<bool, StorageError> {
        Ok(self.data.remove(id.as_str()).is_some())
    }
}
