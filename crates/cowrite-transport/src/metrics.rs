//! Prometheus metrics for cowrite
//!
//! Metrics are exposed in Prometheus text format via HTTP.

use crate::error::TransportResult;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info};

/// cowrite metrics collector
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Connection metrics
    pub connections_total: IntCounter,
    pub connections_active: IntGauge,
    pub clients_kicked: IntCounterVec,

    // Document metrics
    pub documents_live: IntGauge,

    // Operation metrics
    pub operations_total: IntCounterVec,
    pub operations_fanned_out: IntCounter,
    pub integrate_duration_seconds: Histogram,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total =
            IntCounter::new("cowrite_connections_total", "Total number of client sessions")?;
        let connections_active =
            IntGauge::new("cowrite_connections_active", "Number of connected client sessions")?;
        let clients_kicked = IntCounterVec::new(
            Opts::new("cowrite_clients_kicked_total", "Sessions closed by the server"),
            &["reason"],
        )?;

        let documents_live =
            IntGauge::new("cowrite_documents_live", "Document servers currently running")?;

        let operations_total = IntCounterVec::new(
            Opts::new("cowrite_operations_total", "Operations submitted by clients"),
            &["outcome"],
        )?;
        let operations_fanned_out = IntCounter::new(
            "cowrite_operations_fanned_out_total",
            "Operation messages queued for other clients",
        )?;
        let integrate_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cowrite_integrate_duration_seconds",
                "Time spent transforming and applying one operation",
            )
            .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(clients_kicked.clone()))?;
        registry.register(Box::new(documents_live.clone()))?;
        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(operations_fanned_out.clone()))?;
        registry.register(Box::new(integrate_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            clients_kicked,
            documents_live,
            operations_total,
            operations_fanned_out,
            integrate_duration_seconds,
        })
    }

    /// Record a new session
    pub fn record_connection(&self) {
        self.connections_total.inc();
        self.connections_active.inc();
    }

    /// Record a session ending
    pub fn record_disconnection(&self) {
        self.connections_active.dec();
    }

    /// Record the outcome of one submitted operation
    pub fn record_operation(&self, outcome: &str, duration_secs: f64) {
        self.operations_total.with_label_values(&[outcome]).inc();
        self.integrate_duration_seconds.observe(duration_secs);
    }

    pub fn record_kick(&self, reason: &str) {
        self.clients_kicked.with_label_values(&[reason]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// HTTP server for metrics endpoint
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Run the metrics HTTP server
    pub async fn run(&self) -> TransportResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Metrics server listening on http://{}/metrics", self.addr);

        loop {
            match listener.accept().await {
                Ok((mut stream, _)) => {
                    let metrics = self.metrics.clone();

                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let n = match stream.read(&mut buf).await {
                            Ok(n) if n > 0 => n,
                            _ => return,
                        };
                        let request = String::from_utf8_lossy(&buf[..n]);

                        let response = if request.starts_with("GET /metrics") || request.starts_with("GET / ") {
                            let body = metrics.export();
                            format!(
                                "HTTP/1.1 200 OK\r\n\
                                 Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
                                 Content-Length: {}\r\n\
                                 \r\n\
                                 {}",
                                body.len(),
                                body
                            )
                        } else if request.starts_with("GET /health") {
                            "HTTP/1.1 200 OK\r\n\
                             Content-Type: text/plain\r\n\
                             Content-Length: 2\r\n\
                             \r\n\
                             OK"
                                .to_string()
                        } else {
                            "HTTP/1.1 404 Not Found\r\n\
                             Content-Length: 0\r\n\
                             \r\n"
                                .to_string()
                        };
                        let _ = stream.write_all(response.as_bytes()).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_connection();
        metrics.record_operation("applied", 0.0001);
        metrics.record_kick("slow_consumer");

        let text = metrics.export();
        assert!(text.contains("cowrite_connections_total 1"));
        assert!(text.contains("cowrite_operations_total{outcome=\"applied\"} 1"));
        assert!(text.contains("cowrite_clients_kicked_total{reason=\"slow_consumer\"} 1"));
    }
}
