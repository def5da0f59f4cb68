//! cowrite transport layer
//!
//! Runs the collaborative editing service:
//! - Registry: one document server per live document, loaded from and
//!   persisted to storage
//! - Session: per-document server integrating client operations in order
//! - WebSocket: listener and per-connection adapter
//! - Metrics: Prometheus metrics (optional feature)

pub mod client;
pub mod config;
#[cfg(feature = "websocket")]
pub mod connection;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod registry;
pub mod session;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use client::{client_channel, ClientHandle, ClientOutbox, SendError};
pub use config::ServerConfig;
pub use error::{TransportError, TransportResult};
#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsServer};
pub use registry::Registry;
pub use session::{Connected, DocumentServer, LeaveSignal, Snapshot, SubmitPipe};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketServer;
