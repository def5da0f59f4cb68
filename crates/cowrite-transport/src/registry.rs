//! Registry - owns the live document servers
//!
//! At most one [`DocumentServer`] runs per document id. Servers are loaded
//! from storage on first use and persisted when their last client leaves.

use crate::client::ClientHandle;
use crate::config::ServerConfig;
use crate::error::{TransportError, TransportResult};
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::session::{Connected, DocumentServer};
use cowrite_core::{Document, DocumentId, Error};
use cowrite_protocol::CloseReason;
use cowrite_storage::Storage;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub struct Registry {
    storage: Arc<dyn Storage>,
    config: ServerConfig,
    servers: Mutex<HashMap<DocumentId, Arc<DocumentServer>>>,
    this: Weak<Registry>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl Registry {
    pub fn new(storage: Arc<dyn Storage>, config: ServerConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            storage,
            config,
            servers: Mutex::new(HashMap::new()),
            this: this.clone(),
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }

    /// Create a registry that reports to `metrics`
    #[cfg(feature = "metrics")]
    pub fn with_metrics(
        storage: Arc<dyn Storage>,
        config: ServerConfig,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            storage,
            config,
            servers: Mutex::new(HashMap::new()),
            this: this.clone(),
            metrics: Some(metrics),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    async fn load(&self, id: &DocumentId) -> TransportResult<Arc<DocumentServer>> {
        let document = match self.storage.get_document(id).await? {
            Some(bytes) => Document::from_bytes(id.clone(), &bytes)?,
            None => Document::empty(id.clone()),
        };
        Ok(DocumentServer::attached(document, self.this.clone()))
    }

    fn started(&self, id: &DocumentId) {
        info!(doc_id = %id, "document server started");
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.documents_live.inc();
        }
    }

    fn stopped(&self, id: &DocumentId) {
        info!(doc_id = %id, "document server stopped");
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.documents_live.dec();
        }
    }

    /// Start a server for `id`, failing if one is already running.
    pub async fn open(&self, id: &DocumentId) -> TransportResult<Arc<DocumentServer>> {
        let mut servers = self.servers.lock().await;
        if servers.contains_key(id) {
            return Err(Error::DocumentLocked(id.to_string()).into());
        }
        let server = self.load(id).await?;
        servers.insert(id.clone(), server.clone());
        self.started(id);
        Ok(server)
    }

    /// The running server for `id`, started if needed.
    pub async fn join(&self, id: &DocumentId) -> TransportResult<Arc<DocumentServer>> {
        let mut servers = self.servers.lock().await;
        if let Some(server) = servers.get(id) {
            return Ok(server.clone());
        }
        let server = self.load(id).await?;
        servers.insert(id.clone(), server.clone());
        self.started(id);
        Ok(server)
    }

    /// Join (or open, in exclusive mode) and connect a client.
    ///
    /// A server that retires between lookup and connect is replaced by a
    /// fresh one loaded from what it just persisted.
    pub async fn attach(&self, id: &DocumentId, handle: ClientHandle) -> TransportResult<Connected> {
        loop {
            let server = if self.config.exclusive {
                self.open(id).await?
            } else {
                self.join(id).await?
            };
            match server.connect(handle.clone()).await {
                Err(TransportError::Retired(_)) => {
                    debug!(doc_id = %id, "document server retired while joining, retrying");
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }

    pub async fn get(&self, id: &DocumentId) -> Option<Arc<DocumentServer>> {
        self.servers.lock().await.get(id).cloned()
    }

    /// Ids of all running document servers
    pub async fn live_documents(&self) -> Vec<DocumentId> {
        self.servers.lock().await.keys().cloned().collect()
    }

    /// Persist and drop the server for `id` if no client is connected.
    ///
    /// Returns whether the server was removed.
    pub async fn close(&self, id: &DocumentId) -> TransportResult<bool> {
        let mut servers = self.servers.lock().await;
        let Some(server) = servers.get(id).cloned() else {
            return Ok(false);
        };
        let Some(bytes) = server.retire_if_idle().await? else {
            return Ok(false);
        };

        if let Err(e) = self.storage.truncate_and_write(id, &bytes).await {
            server.reinstate().await;
            return Err(e.into());
        }
        servers.remove(id);
        drop(servers);

        self.stopped(id);
        Ok(true)
    }

    /// Terminate every session, persist every document and close storage.
    pub async fn shutdown(&self) -> TransportResult<()> {
        let servers: Vec<(DocumentId, Arc<DocumentServer>)> =
            self.servers.lock().await.drain().collect();
        info!(documents = servers.len(), "shutting down document servers");

        for (id, server) in servers {
            let persisted = match server.retire(CloseReason::Terminating).await {
                Ok(bytes) => self
                    .storage
                    .truncate_and_write(&id, &bytes)
                    .await
                    .map_err(TransportError::from),
                Err(e) => Err(TransportError::from(e)),
            };
            if let Err(e) = persisted {
                error!(doc_id = %id, error = %e, "failed to persist document on shutdown");
            }
            self.stopped(&id);
        }

        self.storage.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::client_channel;
    use cowrite_core::{Node, Operation};
    use cowrite_protocol::ServerMessage;
    use cowrite_storage::MemoryStorage;
    use std::time::Duration;

    fn registry(config: ServerConfig) -> (Arc<Registry>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (Registry::new(storage.clone(), config), storage)
    }

    async fn wait_until_stopped(registry: &Registry, id: &DocumentId) {
        for _ in 0..100 {
            if registry.get(id).await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("document server for {} never stopped", id);
    }

    #[tokio::test]
    async fn test_join_shares_server() {
        let (registry, _) = registry(ServerConfig::default());
        let id = DocumentId::new("doc:shared").unwrap();

        let first = registry.join(&id).await.unwrap();
        let second = registry.join(&id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.live_documents().await, vec![id]);
    }

    #[tokio::test]
    async fn test_open_is_exclusive() {
        let (registry, _) = registry(ServerConfig::default());
        let id = DocumentId::new("doc:locked").unwrap();

        registry.open(&id).await.unwrap();
        assert!(matches!(
            registry.open(&id).await,
            Err(TransportError::Core(Error::DocumentLocked(_)))
        ));
    }

    #[tokio::test]
    async fn test_new_document_starts_empty() {
        let (registry, _) = registry(ServerConfig::default());
        let id = DocumentId::new("doc:fresh").unwrap();
        let (handle, _outbox) = client_channel(8);

        let connected = registry.attach(&id, handle).await.unwrap();
        assert_eq!(connected.snapshot.contents, Node::Array(vec![]));
        assert_eq!(connected.snapshot.history_index, 0);
    }

    #[tokio::test]
    async fn test_last_leave_persists_and_reloads() {
        let (registry, storage) = registry(ServerConfig::default());
        let id = DocumentId::new("doc:lifecycle").unwrap();
        storage.truncate_and_write(&id, br#"{"n": 1}"#).await.unwrap();

        let (handle, mut outbox) = client_channel(8);
        let connected = registry.attach(&id, handle).await.unwrap();
        connected.pipe.submit(Operation::integer_add("n", 41, 0)).unwrap();
        assert_eq!(outbox.next().await, Some(ServerMessage::acknowledged(1)));

        connected.leave.leave().unwrap();
        wait_until_stopped(&registry, &id).await;

        let stored = storage.get_document(&id).await.unwrap().unwrap();
        let stored: Node = serde_json::from_slice(&stored).unwrap();
        assert_eq!(stored, serde_json::from_str(r#"{"n": 42}"#).unwrap());

        let (handle, _outbox) = client_channel(8);
        let again = registry.attach(&id, handle).await.unwrap();
        assert_eq!(again.snapshot.contents, stored);
        assert_eq!(again.snapshot.history_index, 0);
    }

    #[tokio::test]
    async fn test_close_keeps_busy_server() {
        let (registry, _) = registry(ServerConfig::default());
        let id = DocumentId::new("doc:busy").unwrap();
        let (handle, _outbox) = client_channel(8);

        let _connected = registry.attach(&id, handle).await.unwrap();
        assert!(!registry.close(&id).await.unwrap());
        assert!(registry.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_exclusive_attach_refuses_second_editor() {
        let config = ServerConfig {
            exclusive: true,
            ..ServerConfig::default()
        };
        let (registry, _) = registry(config);
        let id = DocumentId::new("doc:solo").unwrap();

        let (first, _first_out) = client_channel(8);
        let _connected = registry.attach(&id, first).await.unwrap();

        let (second, _second_out) = client_channel(8);
        assert!(matches!(
            registry.attach(&id, second).await,
            Err(TransportError::Core(Error::DocumentLocked(_)))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_persists_and_terminates() {
        let (registry, storage) = registry(ServerConfig::default());
        let id = DocumentId::new("doc:shutdown").unwrap();

        let (handle, mut outbox) = client_channel(8);
        let connected = registry.attach(&id, handle).await.unwrap();
        connected.pipe.submit(Operation::array_insert("0", "kept", 0)).unwrap();
        assert_eq!(outbox.next().await, Some(ServerMessage::acknowledged(1)));

        registry.shutdown().await.unwrap();

        assert_eq!(outbox.next().await, None);
        assert_eq!(outbox.close_reason(), CloseReason::Terminating);
        assert!(registry.live_documents().await.is_empty());
        let stored = storage.get_document(&id).await.unwrap().unwrap();
        assert_eq!(stored, br#"["kept"]"#);
    }
}
