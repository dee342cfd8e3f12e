//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Route definitions mapping requests to clusters.
    pub routes: Vec<RouteConfig>,

    /// Cluster definitions.
    pub clusters: Vec<ClusterConfig>,

    /// Destination definitions, attached to clusters by name.
    pub destinations: Vec<DestinationConfig>,

    /// Health check settings (process-wide defaults).
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Route configuration mapping requests to clusters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Cluster name to forward to.
    pub cluster: String,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// Cluster configuration.
///
/// Per-cluster probe fields are overrides; unset fields fall back to the
/// process-wide `[health_check]` defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Unique cluster identifier.
    pub name: String,

    /// Policy metadata entries, e.g.
    /// `TransportFailureRateHealthPolicy.RateLimit = "0.5"`.
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,

    /// Enable active health probing for this cluster.
    #[serde(default)]
    pub active_health: Option<bool>,

    /// Probe interval in seconds.
    #[serde(default)]
    pub probe_interval_secs: Option<u64>,

    /// Probe timeout in seconds.
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,

    /// Path probed on each destination.
    #[serde(default)]
    pub probe_path: Option<String>,

    /// Active health policy name.
    #[serde(default)]
    pub probe_policy: Option<String>,

    /// Enable passive health evaluation for this cluster.
    #[serde(default)]
    pub passive_health: Option<bool>,

    /// How long an unhealthy destination stays excluded, in seconds.
    #[serde(default)]
    pub reactivation_period_secs: Option<u64>,
}

/// Destination configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestinationConfig {
    /// Identifier, unique within the cluster.
    pub name: String,

    /// Cluster this destination belongs to.
    pub cluster: String,

    /// Destination address (e.g., "http://127.0.0.1:3000").
    pub address: String,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Active probing defaults.
    pub active: ActiveHealthCheckConfig,

    /// Passive evaluation defaults.
    pub passive: PassiveHealthCheckConfig,
}

/// Active health check defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActiveHealthCheckConfig {
    /// Enable active health checks unless a cluster overrides.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe on each destination.
    pub path: String,

    /// Policy applied to probe batches.
    pub policy: String,

    /// Consecutive probe failures before marking unhealthy.
    pub failure_threshold: f64,
}

impl Default for ActiveHealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            policy: "ConsecutiveFailures".to_string(),
            failure_threshold: 2.0,
        }
    }
}

/// Passive health check defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PassiveHealthCheckConfig {
    /// Enable passive health evaluation unless a cluster overrides.
    pub enabled: bool,

    /// Sliding window over which the failure rate is computed, in seconds.
    pub detection_window_secs: u64,

    /// Minimum requests in the window before a verdict is made.
    pub minimal_total_count_threshold: u64,

    /// Failure rate in [0, 1] at or above which a destination is unhealthy.
    pub rate_limit: f64,

    /// How long an unhealthy destination stays excluded, in seconds.
    pub reactivation_period_secs: u64,
}

impl Default for PassiveHealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detection_window_secs: 60,
            minimal_total_count_threshold: 10,
            rate_limit: 0.3,
            reactivation_period_secs: 60,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Inbound request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Upstream send timeout in seconds; 0 disables it.
    pub upstream_request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            upstream_request_secs: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
