//! Metrics collection and exposition.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::cluster::Health;

/// Initialize metrics exporter and server.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tracing::info!("Metrics server listening on http://{}", addr);
}

/// Record a forwarded request.
pub fn record_forwarded_request(method: &str, status: u16, cluster: &str, destination: &str, started: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("cluster", cluster.to_string()),
        ("destination", destination.to_string()),
    ];

    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", &labels).record(started.elapsed().as_secs_f64());
}

/// Update the destination health gauge.
/// Healthy = 1, Unknown = 0.5, Unhealthy = 0.
pub fn record_destination_health(cluster: &str, destination: &str, health: Health) {
    let value = match health {
        Health::Healthy => 1.0,
        Health::Unknown => 0.5,
        Health::Unhealthy => 0.0,
    };
    gauge!(
        "proxy_destination_healthy",
        "cluster" => cluster.to_string(),
        "destination" => destination.to_string()
    )
    .set(value);
}
