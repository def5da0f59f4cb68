//! cowrite daemon (cowrited)
//!
//! Serves collaborative JSON documents over WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # In-memory documents on port 6390
//! cowrited
//!
//! # One file per document under a directory
//! cowrited --storage volume --data /var/lib/cowrite/documents
//!
//! # SQLite persistence, one editor per document
//! cowrited --storage sqlite --data /var/lib/cowrite/cowrite.db --exclusive
//!
//! # With configuration file and metrics
//! cowrited --config /etc/cowrite/cowrite.toml --metrics-port 9390
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{Args, Backend, DaemonConfig, StorageConfig};
use cowrite_storage::{MemoryStorage, SqliteStorage, Storage, VolumeStorage};
use cowrite_transport::{Metrics, MetricsServer, Registry, WebSocketServer};

async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    let path = |default: &str| config.path.clone().unwrap_or_else(|| PathBuf::from(default));

    let storage: Arc<dyn Storage> = match config.backend {
        Backend::Memory => {
            info!("Running in-memory only, documents are lost on exit");
            Arc::new(MemoryStorage::new())
        }
        Backend::Volume => {
            let root = path("documents");
            info!(path = %root.display(), "Using document volume");
            Arc::new(VolumeStorage::open(&root).await?)
        }
        Backend::Sqlite => {
            let db = path("cowrite.db");
            info!(path = %db.display(), "Using SQLite persistence");
            Arc::new(SqliteStorage::new(&db)?)
        }
    };
    Ok(storage)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::load(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let storage = open_storage(&config.storage).await?;

    let metrics = Arc::new(Metrics::new().context("registering metrics")?);
    let registry = Registry::with_metrics(storage, config.server.clone(), metrics.clone());

    let ws_addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    info!(
        addr = %ws_addr,
        exclusive = config.server.exclusive,
        outbound_capacity = config.server.outbound_capacity,
        "Starting cowrite daemon"
    );

    let mut handles = Vec::new();

    let ws_server = WebSocketServer::new(registry.clone(), ws_addr);
    handles.push(tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            error!(error = %e, "WebSocket server error");
        }
    }));

    if let Some(port) = config.metrics_port {
        let metrics_addr: SocketAddr = format!("{}:{}", config.bind, port).parse()?;
        let metrics_server = MetricsServer::new(metrics, metrics_addr);
        handles.push(tokio::spawn(async move {
            if let Err(e) = metrics_server.run().await {
                error!(error = %e, "Metrics server error");
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for handle in &handles {
        handle.abort();
    }
    registry.shutdown().await?;

    Ok(())
}
