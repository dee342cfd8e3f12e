//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (priority-ordered lookup)
//!     → Return: matched Route (cluster name) or NoMatch
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Sort by priority
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (exact host, prefix path)
//! - Explicit NoMatch rather than silent default
//! - First match wins (ordered by priority)

pub mod router;

pub use router::{Route, Router};
