//! Active health check orchestration.
//!
//! # Responsibilities
//! - React to cluster lifecycle events (schedule/reschedule/unschedule)
//! - Run the initial synchronous probe pass before traffic is served
//! - Release the scheduler once the initial pass completes
//!
//! # Design Decisions
//! - Holds the registry weakly; the registry owns clusters and also holds
//!   this monitor as a listener
//! - Timer callbacks re-resolve the cluster by id, so a config change is
//!   picked up on the next fire
//! - The initial-probe latch is set even if the pass fails; startup must
//!   not deadlock on a dead backend

use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::cluster::{Cluster, ClusterEventListener, ClusterRegistry};
use crate::health::active::ActiveProber;
use crate::health::scheduler::EntityScheduler;

/// Drives periodic probing across all active-enabled clusters.
pub struct ActiveHealthCheckMonitor {
    prober: Arc<ActiveProber>,
    scheduler: Arc<EntityScheduler>,
    registry: Weak<ClusterRegistry>,
    default_interval: Duration,
    initial_probe_completed: AtomicBool,
}

impl ActiveHealthCheckMonitor {
    pub fn new(
        prober: Arc<ActiveProber>,
        scheduler: Arc<EntityScheduler>,
        registry: &Arc<ClusterRegistry>,
        default_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            prober,
            scheduler,
            registry: Arc::downgrade(registry),
            default_interval,
            initial_probe_completed: AtomicBool::new(false),
        })
    }

    /// Probe every active-enabled cluster once, then release the scheduler.
    ///
    /// Serving should wait on [`Self::initial_probe_completed`] so traffic
    /// never starts against clusters of entirely unknown health. The latch
    /// is set even when probing fails.
    pub async fn check_health_all(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let clusters = registry.clusters();
            let probes = clusters
                .iter()
                .filter(|cluster| cluster.active.enabled)
                .map(|cluster| self.prober.probe_cluster(cluster));
            futures::future::join_all(probes).await;

            for cluster in &clusters {
                if cluster.active.enabled {
                    self.schedule_cluster(cluster);
                }
            }
        }

        self.scheduler.start();
        self.initial_probe_completed.store(true, Ordering::SeqCst);
        tracing::info!("Initial active health probe completed");
    }

    pub fn initial_probe_completed(&self) -> bool {
        self.initial_probe_completed.load(Ordering::SeqCst)
    }

    fn schedule_cluster(&self, cluster: &Arc<Cluster>) {
        let interval = cluster.active.interval.unwrap_or(self.default_interval);
        let cluster_id = cluster.cluster_id.clone();
        let registry = self.registry.clone();
        let prober = self.prober.clone();

        self.scheduler.schedule(cluster_id.clone(), interval, Arc::new(move || {
            let registry = registry.clone();
            let prober = prober.clone();
            let cluster_id = cluster_id.clone();
            async move {
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                // Re-resolve so the fire observes the current snapshot.
                if let Some(cluster) = registry.get(&cluster_id) {
                    prober.probe_cluster(&cluster).await;
                }
            }
            .boxed()
        }));

        tracing::info!(cluster = %cluster.cluster_id, "Started active health probing");
    }
}

impl ClusterEventListener for ActiveHealthCheckMonitor {
    fn on_cluster_added(&self, cluster: &Arc<Cluster>) {
        if cluster.active.enabled {
            self.schedule_cluster(cluster);
        }
    }

    fn on_cluster_changed(&self, cluster: &Arc<Cluster>) {
        if cluster.active.enabled {
            let interval = cluster.active.interval.unwrap_or(self.default_interval);
            if self.scheduler.is_scheduled(&cluster.cluster_id) {
                self.scheduler.change_period(&cluster.cluster_id, interval);
            } else {
                self.schedule_cluster(cluster);
            }
        } else {
            self.scheduler.unschedule(&cluster.cluster_id);
            tracing::info!(cluster = %cluster.cluster_id, "Stopped active health probing");
        }
    }

    fn on_cluster_removed(&self, cluster: &Arc<Cluster>) {
        self.scheduler.unschedule(&cluster.cluster_id);
        tracing::info!(cluster = %cluster.cluster_id, "Stopped active health probing");
    }
}
