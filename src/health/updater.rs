//! Health transition serialization.
//!
//! # Responsibilities
//! - Apply passive and active verdicts to destination health
//! - Own the reactivation timer returning destinations to the pool
//!
//! # Design Decisions
//! - Transitions for one destination serialize on its transition lock
//! - A repeated Unhealthy verdict resets the timer instead of stacking;
//!   stale timers are detected through a generation counter
//! - Reactivation promotes to Unknown, so the destination re-earns trust

use std::sync::Arc;

use crate::cluster::{Cluster, Destination, Health};
use crate::health::HealthVerdict;
use crate::observability::metrics;

/// Sole writer of destination health.
pub struct HealthUpdater;

impl HealthUpdater {
    pub fn new() -> Self {
        Self
    }

    /// Apply a verdict from the passive evaluator.
    pub fn set_passive(&self, cluster: &Arc<Cluster>, destination: &Arc<Destination>, verdict: HealthVerdict) {
        self.apply(cluster, destination, verdict);
    }

    /// Apply a batch of verdicts from an active probing pass.
    pub fn set_active(&self, cluster: &Arc<Cluster>, verdicts: Vec<(Arc<Destination>, HealthVerdict)>) {
        for (destination, verdict) in verdicts {
            self.apply(cluster, &destination, verdict);
        }
    }

    fn apply(&self, cluster: &Arc<Cluster>, destination: &Arc<Destination>, verdict: HealthVerdict) {
        let mut transition = destination.transition.lock().unwrap();
        let previous = destination.health();

        match verdict.health {
            Health::Unhealthy => {
                destination.store_health(Health::Unhealthy);
                transition.generation += 1;
                let generation = transition.generation;

                if previous != Health::Unhealthy {
                    tracing::warn!(
                        cluster = %cluster.cluster_id,
                        destination = %destination.destination_id,
                        reactivation_secs = verdict.reactivation_period.as_secs_f64(),
                        "Destination marked unhealthy"
                    );
                }

                let cluster_id = cluster.cluster_id.clone();
                let destination = destination.clone();
                let period = verdict.reactivation_period;
                tokio::spawn(async move {
                    tokio::time::sleep(period).await;
                    let transition = destination.transition.lock().unwrap();
                    if transition.generation == generation && destination.health() == Health::Unhealthy {
                        destination.store_health(Health::Unknown);
                        metrics::record_destination_health(&cluster_id, &destination.destination_id, Health::Unknown);
                        tracing::info!(
                            cluster = %cluster_id,
                            destination = %destination.destination_id,
                            "Reactivation period elapsed, destination eligible again"
                        );
                    }
                });
            }
            health => {
                destination.store_health(health);
                if previous == Health::Unhealthy {
                    tracing::info!(
                        cluster = %cluster.cluster_id,
                        destination = %destination.destination_id,
                        "Destination recovered"
                    );
                }
            }
        }

        metrics::record_destination_health(&cluster.cluster_id, &destination.destination_id, destination.health());
    }
}

impl Default for HealthUpdater {
    fn default() -> Self {
        Self::new()
    }
}
