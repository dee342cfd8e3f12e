//! Monotonic time source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic time source expressed as ticks at a fixed frequency.
///
/// The health core never reads wall-clock time; everything that ages
/// (failure windows, reactivation deadlines) is measured against this trait
/// so tests can drive time by hand.
pub trait Clock: Send + Sync {
    /// Current monotonic tick count.
    fn now_ticks(&self) -> u64;

    /// Number of ticks per second.
    fn frequency(&self) -> u64;
}

/// Convert a duration into ticks at the given frequency.
pub fn duration_ticks(duration: Duration, frequency: u64) -> u64 {
    duration.as_secs() * frequency + (u64::from(duration.subsec_nanos()) * frequency) / 1_000_000_000
}

/// Production clock backed by [`Instant`], microsecond resolution.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ticks(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn frequency(&self) -> u64 {
        1_000_000
    }
}

/// Hand-driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, by: Duration) {
        self.ticks
            .fetch_add(duration_ticks(by, self.frequency()), Ordering::SeqCst);
    }

    /// Set the clock to an absolute tick count.
    pub fn set_ticks(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn frequency(&self) -> u64 {
        1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_ticks() {
        assert_eq!(duration_ticks(Duration::from_secs(10), 1_000_000), 10_000_000);
        assert_eq!(duration_ticks(Duration::from_millis(500), 1_000_000), 500_000);
        assert_eq!(duration_ticks(Duration::from_secs(1), 1000), 1000);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ticks(), 0);

        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_ticks(), 2_000_000);

        clock.advance(Duration::from_millis(1));
        assert_eq!(clock.now_ticks(), 2_001_000);
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now_ticks();
        let b = clock.now_ticks();
        assert!(b >= a);
    }
}
