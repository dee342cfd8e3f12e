//! Injectable runtime services.
//!
//! # Data Flow
//! ```text
//! Health window & reactivation:
//!     → clock.rs (monotonic ticks + frequency)
//!
//! Destination selection tie-break:
//!     → random.rs (RNG factory, fresh instance per request)
//! ```
//!
//! # Design Decisions
//! - All timestamps in the health core are monotonic ticks, never wall clock
//! - Tests inject a manual clock and fixed random sequences
//! - The factory indirection keeps the hot path free of shared RNG state

pub mod clock;
pub mod random;

pub use clock::{duration_ticks, Clock, ManualClock, MonotonicClock};
pub use random::{RandomFactory, RandomSource, ThreadRandomFactory};
