//! Daemon configuration: TOML file merged with command line flags

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cowrite_transport::ServerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Volume,
    Sqlite,
}

/// cowrite daemon - real-time collaborative document editing
#[derive(Parser, Debug, Default)]
#[command(name = "cowrited")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "COWRITE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address
    #[arg(long, env = "COWRITE_BIND")]
    pub bind: Option<String>,

    /// WebSocket port to listen on
    #[arg(long, env = "COWRITE_PORT")]
    pub port: Option<u16>,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, env = "COWRITE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Storage backend
    #[arg(long, env = "COWRITE_STORAGE", value_enum)]
    pub storage: Option<Backend>,

    /// Directory (volume) or database file (sqlite)
    #[arg(long, env = "COWRITE_DATA")]
    pub data: Option<PathBuf>,

    /// Outgoing queue capacity per client
    #[arg(long, env = "COWRITE_OUTBOUND_CAPACITY")]
    pub outbound_capacity: Option<usize>,

    /// Close sessions idle for this many seconds
    #[arg(long, env = "COWRITE_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Allow only one editor per document
    #[arg(long, env = "COWRITE_EXCLUSIVE")]
    pub exclusive: bool,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "COWRITE_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind: String,
    pub port: u16,
    pub log_level: String,
    pub metrics_port: Option<u16>,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 6390,
            log_level: "info".to_string(),
            metrics_port: None,
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Load the file named by `args`, if any, then apply the flags on top.
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(args);
        Ok(config)
    }

    fn apply(&mut self, args: &Args) {
        if let Some(bind) = &args.bind {
            self.bind = bind.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if let Some(port) = args.metrics_port {
            self.metrics_port = Some(port);
        }
        if let Some(backend) = args.storage {
            self.storage.backend = backend;
        }
        if let Some(path) = &args.data {
            self.storage.path = Some(path.clone());
        }
        if let Some(capacity) = args.outbound_capacity {
            self.server.outbound_capacity = capacity;
        }
        if let Some(secs) = args.idle_timeout {
            self.server.idle_timeout_secs = Some(secs);
        }
        if args.exclusive {
            self.server.exclusive = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::load(&Args::default()).unwrap();
        assert_eq!(config.port, 6390);
        assert_eq!(config.storage.backend, Backend::Memory);
        assert_eq!(config.server.outbound_capacity, 256);
        assert!(!config.server.exclusive);
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            port = 7000
            log_level = "debug"

            [storage]
            backend = "volume"
            path = "/srv/docs"

            [server]
            outbound_capacity = 16
            idle_timeout_secs = 30
            "#
        )
        .unwrap();

        let args = Args {
            config: Some(file.path().to_path_buf()),
            port: Some(7100),
            exclusive: true,
            ..Args::default()
        };
        let config = DaemonConfig::load(&args).unwrap();

        assert_eq!(config.port, 7100);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.storage.backend, Backend::Volume);
        assert_eq!(config.storage.path, Some(PathBuf::from("/srv/docs")));
        assert_eq!(config.server.outbound_capacity, 16);
        assert_eq!(config.server.idle_timeout_secs, Some(30));
        assert!(config.server.exclusive);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["cowrited", "--storage", "sqlite", "--data", "docs.db"]);
        assert_eq!(args.storage, Some(Backend::Sqlite));
        assert_eq!(args.data, Some(PathBuf::from("docs.db")));
    }
}
