//! Directory backed storage
//!
//! Each document is one `<id>.json` file under the volume root.

use crate::{Storage, StorageError};
use async_trait::async_trait;
use cowrite_core::DocumentId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const EXTENSION: &str = "json";

/// Storage backend keeping one file per document in a directory
pub struct VolumeStorage {
    root: PathBuf,
}

impl VolumeStorage {
    /// Open a volume, creating the directory if needed
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "opened document volume");
        Ok(Self { root })
    }

    fn file_path(&self, id: &DocumentId) -> PathBuf {
        self.root.join(format!("{}.{}", id.as_str(), EXTENSION))
    }

    fn scratch_path(&self, id: &DocumentId) -> PathBuf {
        self.root.join(format!(".{}.{}.tmp", id.as_str(), EXTENSION))
    }
}

#[async_trait]
impl Storage for VolumeStorage {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.file_path(id)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn truncate_and_write(&self, id: &DocumentId, data: &[u8]) -> Result<(), StorageError> {
        // write aside and rename so readers never see a half written file
        let scratch = self.scratch_path(id);
        fs::write(&scratch, data).await?;
        fs::rename(&scratch, self.file_path(id)).await?;
        Ok(())
    }

    async fn delete(&self, id: &DocumentId) -> Result<bool, StorageError> {
        match fs::remove_file(self.file_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
