//! Document server configuration

use serde::Deserialize;
use std::time::Duration;

/// Settings shared by every document server of a registry
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Capacity of each client's outgoing operation queue. A client whose
    /// queue is full when an operation is fanned out is disconnected.
    pub outbound_capacity: usize,
    /// Close sessions that send nothing for this many seconds
    pub idle_timeout_secs: Option<u64>,
    /// Refuse a second editor instead of letting it join
    pub exclusive: bool,
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            idle_timeout_secs: None,
            exclusive: false,
        }
    }
}
