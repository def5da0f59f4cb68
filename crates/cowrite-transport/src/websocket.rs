//! WebSocket listener for cowrite
//!
//! Clients connect to `ws://host:port/<document-id>`.

use crate::connection::serve_connection;
use crate::error::{TransportError, TransportResult};
use crate::registry::Registry;
use cowrite_core::DocumentId;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info};

/// Document id addressed by a request path such as `/notes:today`
pub fn document_id_from_path(path: &str) -> TransportResult<DocumentId> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    DocumentId::new(trimmed).map_err(|e| TransportError::BadRequestPath(format!("{}: {}", path, e)))
}

/// WebSocket server for cowrite
pub struct WebSocketServer {
    registry: Arc<Registry>,
    addr: SocketAddr,
    connection_counter: AtomicU64,
}

impl WebSocketServer {
    pub fn new(registry: Arc<Registry>, addr: SocketAddr) -> Self {
        Self {
            registry,
            addr,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Bind and serve until the task is dropped
    pub async fn run(&self) -> TransportResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> TransportResult<()> {
        info!(addr = %listener.local_addr()?, "cowrite WebSocket server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let connection = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                    let registry = self.registry.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, peer_addr, registry).await {
                            error!(peer = %peer_addr, connection, error = %e, "WebSocket connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        registry: Arc<Registry>,
    ) -> TransportResult<()> {
        let mut document = None;
        let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
            match document_id_from_path(request.uri().path()) {
                Ok(id) => {
                    document = Some(id);
                    Ok(response)
                }
                Err(e) => {
                    let mut refusal = ErrorResponse::new(Some(e.to_string()));
                    *refusal.status_mut() = StatusCode::BAD_REQUEST;
                    Err(refusal)
                }
            }
        })
        .await?;

        let Some(id) = document else {
            return Err(TransportError::BadRequestPath("missing document id".into()));
        };
        debug!(peer = %peer_addr, doc_id = %id, "WebSocket client connected");

        serve_connection(ws, registry, id).await
    }
}
