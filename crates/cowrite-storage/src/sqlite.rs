//! SQLite storage backend

use crate::{Storage, StorageError};
use async_trait::async_trait;
use cowrite_core::DocumentId;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

fn db_error(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

/// SQLite storage backend
///
/// Embedded persistence suitable for single-node setups.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
            );
            "#,
        )
        .map_err(db_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.conn.lock();

        conn.query_row(
            "SELECT data FROM documents WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)
    }

    async fn truncate_and_write(&self, id: &DocumentId, data: &[u8]) -> Result<(), StorageError> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO documents (id, data, updated_at)
            VALUES (?1, ?2, strftime('%s', 'now') * 1000)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![id.as_str(), data],
        )
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete(&self, id: &DocumentId) -> Result<bool, StorageError> {
        let conn = self.conn.lock();

        let affected = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id.as_str()])
            .map_err(db_error)?;

        Ok(affected > 0)
    }

    async fn close(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA optimize;").map_err(db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_crud() {
        let storage = SqliteStorage::in_memory().unwrap();
        let id = DocumentId::new("test:sqlite").unwrap();

        storage.truncate_and_write(&id, b"[\"hello\"]").await.unwrap();

        let loaded = storage.get_document(&id).await.unwrap().unwrap();
        assert_eq!(loaded, b"[\"hello\"]");

        assert!(storage.delete(&id).await.unwrap());
        assert!(storage.get_document(&id).await.unwrap().is_none());
        assert!(!storage.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_truncate_and_write() {
        let storage = SqliteStorage::in_memory().unwrap();
        let id = DocumentId::new("test:upsert").unwrap();

        storage.truncate_and_write(&id, b"version1").await.unwrap();
        storage.truncate_and_write(&id, b"v2").await.unwrap();

        let data = storage.get_document(&id).await.unwrap().unwrap();
        assert_eq!(data, b"v2");
    }

    #[tokio::test]
    async fn test_sqlite_file_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cowrite.db");
        let id = DocumentId::new("notes").unwrap();

        let storage = SqliteStorage::new(&path).unwrap();
        storage.truncate_and_write(&id, br#"{"a":1}"#).await.unwrap();
        storage.close().await.unwrap();
        drop(storage);

        let reopened = SqliteStorage::new(&path).unwrap();
        assert_eq!(reopened.get_document(&id).await.unwrap().unwrap(), br#"{"a":1}"#);
    }
}
