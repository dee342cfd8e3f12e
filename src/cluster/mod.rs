//! Cluster and destination model.
//!
//! # Data Flow
//! ```text
//! Config load → registry.rs (build Cluster/Destination state)
//!     → state.rs (cluster snapshot: destinations, probe settings, metadata)
//!     → destination.rs (per-endpoint health, concurrency, failure window)
//!
//! On config change:
//!     registry.rs upsert → new cluster snapshot
//!     → destination state carried over by id
//!     → listeners notified (active health monitor reschedules)
//! ```
//!
//! # Design Decisions
//! - Cluster snapshots are immutable; a change swaps the whole Arc
//! - Destination runtime state (counters, window) survives cluster swaps
//! - Registry is the single owner; every other component holds Arc handles

pub mod destination;
pub mod registry;
pub mod state;

pub use destination::{ConcurrencyGuard, Destination, Health};
pub use registry::{ClusterEventListener, ClusterRegistry};
pub use state::{ActiveHealthSettings, Cluster, PassiveHealthSettings};
