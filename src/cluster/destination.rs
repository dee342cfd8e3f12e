//! Destination state and concurrency tracking.
//!
//! # Responsibilities
//! - Represent a single backend endpoint of a cluster
//! - Track in-flight requests (cluster and destination gauges)
//! - Hold the per-destination health state and failure window

use axum::http::Uri;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::cluster::state::Cluster;
use crate::health::sliding_counter::SlidingCounter;

/// Observed health of a destination.
///
/// `Unknown` destinations are candidate-eligible: a fresh endpoint has no
/// evidence against it, and a reactivated one starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Health {
    Healthy = 0,
    Unhealthy = 1,
    Unknown = 2,
}

impl Health {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Health::Healthy,
            1 => Health::Unhealthy,
            _ => Health::Unknown,
        }
    }

    /// Whether a destination in this state may receive traffic.
    pub fn is_eligible(self) -> bool {
        self != Health::Unhealthy
    }
}

/// Guards timer ownership for health reactivation.
///
/// Every Unhealthy verdict bumps the generation; a reactivation timer only
/// acts if it still holds the current generation.
#[derive(Debug, Default)]
pub(crate) struct TransitionState {
    pub(crate) generation: u64,
}

/// A single backend endpoint.
#[derive(Debug)]
pub struct Destination {
    /// Identifier, unique within the owning cluster.
    pub destination_id: String,
    /// Address requests are forwarded to.
    pub address: Uri,
    /// In-flight request count.
    concurrency: AtomicU64,
    /// Current health, written only by the health updater.
    health: AtomicU8,
    /// Reactivation timer ownership, serialized with health transitions.
    pub(crate) transition: Mutex<TransitionState>,
    /// Windowed failure counters, written only by the passive evaluator.
    pub(crate) window: Mutex<SlidingCounter>,
    /// Consecutive active-probe failures.
    pub(crate) probe_failures: AtomicU32,
}

impl Destination {
    pub fn new(destination_id: impl Into<String>, address: Uri) -> Self {
        Self {
            destination_id: destination_id.into(),
            address,
            concurrency: AtomicU64::new(0),
            health: AtomicU8::new(Health::Unknown as u8),
            transition: Mutex::new(TransitionState::default()),
            window: Mutex::new(SlidingCounter::new()),
            probe_failures: AtomicU32::new(0),
        }
    }

    /// Current number of in-flight requests.
    pub fn concurrency(&self) -> u64 {
        self.concurrency.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_concurrency(&self) {
        self.concurrency.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_concurrency(&self) {
        self.concurrency.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current health.
    pub fn health(&self) -> Health {
        Health::from_u8(self.health.load(Ordering::Acquire))
    }

    pub(crate) fn store_health(&self, health: Health) {
        self.health.store(health as u8, Ordering::Release);
    }
}

/// RAII guard pairing concurrency increments with decrements.
///
/// Acquired before the upstream send and dropped on every exit path, so the
/// gauges return to their pre-request values even when the send fails or the
/// client goes away.
#[derive(Debug)]
pub struct ConcurrencyGuard {
    cluster: Arc<Cluster>,
    destination: Arc<Destination>,
}

impl ConcurrencyGuard {
    pub fn acquire(cluster: &Arc<Cluster>, destination: &Arc<Destination>) -> Self {
        cluster.inc_concurrency();
        destination.inc_concurrency();
        Self {
            cluster: cluster.clone(),
            destination: destination.clone(),
        }
    }
}

impl Deref for ConcurrencyGuard {
    type Target = Destination;

    fn deref(&self) -> &Self::Target {
        &self.destination
    }
}

impl Drop for ConcurrencyGuard {
    fn drop(&mut self) {
        self.cluster.dec_concurrency();
        self.destination.dec_concurrency();
    }
}
