//! Cluster snapshot state.
//!
//! # Responsibilities
//! - Hold a cluster's destinations and health-check settings
//! - Track the cluster-wide in-flight request count
//! - Cache parsed policy metadata (invariant decimal parsing, once per key)

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::destination::Destination;

/// Per-cluster active health checking settings.
///
/// `None` fields fall back to the process-wide defaults held by the monitor
/// and prober.
#[derive(Debug, Clone, Default)]
pub struct ActiveHealthSettings {
    pub enabled: bool,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub path: Option<String>,
    pub policy: Option<String>,
}

/// Per-cluster passive health checking settings.
#[derive(Debug, Clone)]
pub struct PassiveHealthSettings {
    pub enabled: bool,
    pub reactivation_period: Option<Duration>,
}

impl Default for PassiveHealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reactivation_period: None,
        }
    }
}

/// A logical group of interchangeable destinations.
#[derive(Debug)]
pub struct Cluster {
    /// Stable identifier.
    pub cluster_id: String,
    /// Owned destinations. Immutable for the lifetime of this snapshot.
    pub destinations: Vec<Arc<Destination>>,
    /// Active health checking settings.
    pub active: ActiveHealthSettings,
    /// Passive health checking settings.
    pub passive: PassiveHealthSettings,
    /// Free-form metadata consulted by health policies.
    pub metadata: HashMap<String, String>,
    /// In-flight request count across all destinations.
    concurrency: AtomicU64,
    /// Parsed numeric metadata, cached per key.
    parsed_metadata: DashMap<String, Option<f64>>,
}

impl Cluster {
    pub fn new(
        cluster_id: impl Into<String>,
        destinations: Vec<Arc<Destination>>,
        active: ActiveHealthSettings,
        passive: PassiveHealthSettings,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            destinations,
            active,
            passive,
            metadata,
            concurrency: AtomicU64::new(0),
            parsed_metadata: DashMap::new(),
        }
    }

    /// Minimal cluster for unit tests: passive checks on, no active probing.
    pub fn for_tests(cluster_id: impl Into<String>, destinations: Vec<Arc<Destination>>) -> Self {
        Self::new(
            cluster_id,
            destinations,
            ActiveHealthSettings::default(),
            PassiveHealthSettings::default(),
            HashMap::new(),
        )
    }

    /// Current number of in-flight requests across the cluster.
    pub fn concurrency(&self) -> u64 {
        self.concurrency.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_concurrency(&self) {
        self.concurrency.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_concurrency(&self) {
        self.concurrency.fetch_sub(1, Ordering::Relaxed);
    }

    /// Look up a destination by id.
    pub fn destination(&self, destination_id: &str) -> Option<Arc<Destination>> {
        self.destinations
            .iter()
            .find(|d| d.destination_id == destination_id)
            .cloned()
    }

    /// Destinations currently eligible for selection.
    pub fn available_destinations(&self) -> Vec<Arc<Destination>> {
        self.destinations
            .iter()
            .filter(|d| d.health().is_eligible())
            .cloned()
            .collect()
    }

    /// Metadata entry parsed as a decimal, cached per key.
    ///
    /// Unparseable values are cached as absent so a bad entry is parsed
    /// (and rejected) once, not per request.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        if let Some(cached) = self.parsed_metadata.get(key) {
            return *cached;
        }
        let parsed = self.metadata.get(key).and_then(|raw| raw.trim().parse::<f64>().ok());
        self.parsed_metadata.insert(key.to_string(), parsed);
        parsed
    }
}
