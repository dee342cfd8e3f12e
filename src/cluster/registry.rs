//! Cluster registry.
//!
//! # Responsibilities
//! - Build cluster/destination state from configuration
//! - Apply config-driven add/change/remove while preserving runtime state
//! - Notify listeners (active health monitor) of lifecycle events

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cluster::destination::Destination;
use crate::cluster::state::{ActiveHealthSettings, Cluster, PassiveHealthSettings};
use crate::config::schema::{ClusterConfig, DestinationConfig, HealthCheckConfig, ProxyConfig};

/// Observer of cluster lifecycle events.
pub trait ClusterEventListener: Send + Sync {
    fn on_cluster_added(&self, cluster: &Arc<Cluster>);
    fn on_cluster_changed(&self, cluster: &Arc<Cluster>);
    fn on_cluster_removed(&self, cluster: &Arc<Cluster>);
}

/// Holds every known cluster, keyed by id.
///
/// Snapshots are immutable; an upsert builds a fresh [`Cluster`] and carries
/// over the runtime state (health, counters, failure window) of destinations
/// that survive the change, matched by id.
pub struct ClusterRegistry {
    clusters: DashMap<String, Arc<Cluster>>,
    listeners: RwLock<Vec<Arc<dyn ClusterEventListener>>>,
    /// Process-wide health defaults applied where clusters don't override.
    health_defaults: HealthCheckConfig,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::with_defaults(HealthCheckConfig::default())
    }

    pub fn with_defaults(health_defaults: HealthCheckConfig) -> Self {
        Self {
            clusters: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            health_defaults,
        }
    }

    /// Build the registry from configuration. No events are fired; the
    /// initial probe pass observes the registry directly.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let registry = Self::with_defaults(config.health_check.clone());
        for cluster_cfg in &config.clusters {
            let destinations: Vec<&DestinationConfig> = config
                .destinations
                .iter()
                .filter(|d| d.cluster == cluster_cfg.name)
                .collect();
            let cluster = build_cluster(cluster_cfg, &destinations, &[], &registry.health_defaults);
            registry.clusters.insert(cluster.cluster_id.clone(), cluster);
        }
        registry
    }

    pub fn add_listener(&self, listener: Arc<dyn ClusterEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Look up a cluster by id.
    pub fn get(&self, cluster_id: &str) -> Option<Arc<Cluster>> {
        self.clusters.get(cluster_id).map(|c| c.clone())
    }

    /// All current clusters.
    pub fn clusters(&self) -> Vec<Arc<Cluster>> {
        self.clusters.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Apply an added or changed cluster config.
    pub fn upsert_cluster(&self, cluster_cfg: &ClusterConfig, destinations: &[DestinationConfig]) {
        let existing = self.get(&cluster_cfg.name);
        let carried: Vec<Arc<Destination>> = existing
            .as_ref()
            .map(|c| c.destinations.clone())
            .unwrap_or_default();

        let refs: Vec<&DestinationConfig> = destinations.iter().collect();
        let cluster = build_cluster(cluster_cfg, &refs, &carried, &self.health_defaults);
        self.clusters.insert(cluster.cluster_id.clone(), cluster.clone());

        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            if existing.is_some() {
                listener.on_cluster_changed(&cluster);
            } else {
                listener.on_cluster_added(&cluster);
            }
        }
    }

    /// Remove a cluster and notify listeners.
    pub fn remove_cluster(&self, cluster_id: &str) {
        if let Some((_, cluster)) = self.clusters.remove(cluster_id) {
            let listeners = self.listeners.read().unwrap();
            for listener in listeners.iter() {
                listener.on_cluster_removed(&cluster);
            }
        }
    }
}

impl Default for ClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_cluster(
    cluster_cfg: &ClusterConfig,
    destinations: &[&DestinationConfig],
    carried: &[Arc<Destination>],
    defaults: &HealthCheckConfig,
) -> Arc<Cluster> {
    let mut built = Vec::with_capacity(destinations.len());
    for dest_cfg in destinations {
        // Reuse live state for destinations that survive the change.
        if let Some(prev) = carried.iter().find(|d| d.destination_id == dest_cfg.name) {
            if prev.address.to_string().trim_end_matches('/') == dest_cfg.address.trim_end_matches('/') {
                built.push(prev.clone());
                continue;
            }
        }
        match dest_cfg.address.parse() {
            Ok(address) => built.push(Arc::new(Destination::new(&dest_cfg.name, address))),
            Err(_) => {
                tracing::warn!(
                    cluster = %cluster_cfg.name,
                    destination = %dest_cfg.name,
                    address = %dest_cfg.address,
                    "Invalid destination address, skipping"
                );
            }
        }
    }

    let active = ActiveHealthSettings {
        enabled: cluster_cfg.active_health.unwrap_or(defaults.active.enabled),
        interval: cluster_cfg.probe_interval_secs.map(Duration::from_secs),
        timeout: cluster_cfg.probe_timeout_secs.map(Duration::from_secs),
        path: cluster_cfg.probe_path.clone(),
        policy: cluster_cfg.probe_policy.clone(),
    };
    let passive = PassiveHealthSettings {
        enabled: cluster_cfg.passive_health.unwrap_or(defaults.passive.enabled),
        reactivation_period: cluster_cfg.reactivation_period_secs.map(Duration::from_secs),
    };

    Arc::new(Cluster::new(
        &cluster_cfg.name,
        built,
        active,
        passive,
        cluster_cfg.metadata.clone().unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::destination::Health;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cluster_cfg(name: &str) -> ClusterConfig {
        ClusterConfig {
            name: name.into(),
            metadata: None,
            active_health: None,
            probe_interval_secs: None,
            probe_timeout_secs: None,
            probe_path: None,
            probe_policy: None,
            passive_health: None,
            reactivation_period_secs: None,
        }
    }

    fn dest_cfg(name: &str, cluster: &str, address: &str) -> DestinationConfig {
        DestinationConfig {
            name: name.into(),
            cluster: cluster.into(),
            address: address.into(),
        }
    }

    #[derive(Default)]
    struct CountingListener {
        added: AtomicUsize,
        changed: AtomicUsize,
        removed: AtomicUsize,
    }

    impl ClusterEventListener for CountingListener {
        fn on_cluster_added(&self, _cluster: &Arc<Cluster>) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }
        fn on_cluster_changed(&self, _cluster: &Arc<Cluster>) {
            self.changed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_cluster_removed(&self, _cluster: &Arc<Cluster>) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_upsert_fires_added_then_changed() {
        let registry = ClusterRegistry::new();
        let listener = Arc::new(CountingListener::default());
        registry.add_listener(listener.clone());

        let cfg = cluster_cfg("c1");
        let dests = vec![dest_cfg("d1", "c1", "http://127.0.0.1:9001")];
        registry.upsert_cluster(&cfg, &dests);
        registry.upsert_cluster(&cfg, &dests);

        assert_eq!(listener.added.load(Ordering::SeqCst), 1);
        assert_eq!(listener.changed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_fires_removed() {
        let registry = ClusterRegistry::new();
        let listener = Arc::new(CountingListener::default());
        registry.add_listener(listener.clone());

        registry.upsert_cluster(&cluster_cfg("c1"), &[dest_cfg("d1", "c1", "http://127.0.0.1:9001")]);
        registry.remove_cluster("c1");
        registry.remove_cluster("c1");

        assert_eq!(listener.removed.load(Ordering::SeqCst), 1);
        assert!(registry.get("c1").is_none());
    }

    #[test]
    fn test_upsert_preserves_destination_state() {
        let registry = ClusterRegistry::new();
        let dests = vec![dest_cfg("d1", "c1", "http://127.0.0.1:9001")];
        registry.upsert_cluster(&cluster_cfg("c1"), &dests);

        let before = registry.get("c1").unwrap().destination("d1").unwrap();
        before.store_health(Health::Unhealthy);

        registry.upsert_cluster(&cluster_cfg("c1"), &dests);
        let after = registry.get("c1").unwrap().destination("d1").unwrap();

        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.health(), Health::Unhealthy);
    }

    #[test]
    fn test_invalid_address_skipped() {
        let registry = ClusterRegistry::new();
        let dests = vec![
            dest_cfg("bad", "c1", "not a uri \u{0}"),
            dest_cfg("good", "c1", "http://127.0.0.1:9001"),
        ];
        registry.upsert_cluster(&cluster_cfg("c1"), &dests);

        let cluster = registry.get("c1").unwrap();
        assert_eq!(cluster.destinations.len(), 1);
        assert_eq!(cluster.destinations[0].destination_id, "good");
    }
}
