//! Windowed failed/total request counters.
//!
//! # Responsibilities
//! - Accumulate request outcomes into one-second buckets
//! - Maintain aggregate counts over a sliding detection window
//! - Report the failure rate once enough evidence has accumulated
//!
//! # Design Decisions
//! - At most one sealed record per second bounds queue growth at any
//!   request rate
//! - Aggregates are maintained incrementally; no rescan on read
//! - Below the minimal-total threshold the rate is 0.0 (insufficient
//!   evidence is not a verdict)

use std::collections::VecDeque;
use std::time::Duration;

use crate::runtime::clock::duration_ticks;

/// A sealed one-second bucket of outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Tick at which the bucket was sealed.
    pub recorded_at: u64,
    pub total: u32,
    pub failed: u32,
}

/// The bucket currently accumulating outcomes.
#[derive(Debug, Clone, Copy)]
struct AccumulatingRecord {
    /// Tick at which this bucket closes (creation + one second).
    created_at: u64,
    total: u32,
    failed: u32,
}

/// Sliding failed/total counters for one destination.
#[derive(Debug)]
pub struct SlidingCounter {
    records: VecDeque<HistoryRecord>,
    current: Option<AccumulatingRecord>,
    total_count: u64,
    failed_count: u64,
}

impl SlidingCounter {
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
            current: None,
            total_count: 0,
            failed_count: 0,
        }
    }

    /// Aggregate request count inside the window.
    pub fn total(&self) -> u64 {
        self.total_count
    }

    /// Aggregate failure count inside the window.
    pub fn failed(&self) -> u64 {
        self.failed_count
    }

    /// Record one observation and return the current failure rate.
    ///
    /// `now` and `frequency` come from the injected clock. Returns 0.0
    /// until at least `min_total` requests are inside the window.
    pub fn add_new(
        &mut self,
        now: u64,
        frequency: u64,
        failed: bool,
        detection_window: Duration,
        min_total: u64,
    ) -> f64 {
        let current = self.current.get_or_insert(AccumulatingRecord {
            created_at: now + frequency,
            total: 0,
            failed: 0,
        });

        // Seal the bucket once its second has elapsed.
        if now >= current.created_at {
            self.records.push_back(HistoryRecord {
                recorded_at: current.created_at,
                total: current.total,
                failed: current.failed,
            });
            *current = AccumulatingRecord {
                created_at: now + frequency,
                total: 0,
                failed: 0,
            };
        }

        current.total += 1;
        self.total_count += 1;
        if failed {
            current.failed += 1;
            self.failed_count += 1;
        }

        // Evict records that aged out of the window.
        let window_ticks = duration_ticks(detection_window, frequency);
        while let Some(head) = self.records.front() {
            if now.saturating_sub(head.recorded_at) > window_ticks {
                self.total_count -= u64::from(head.total);
                self.failed_count -= u64::from(head.failed);
                self.records.pop_front();
            } else {
                break;
            }
        }

        if self.total_count == 0 || self.total_count < min_total {
            return 0.0;
        }
        self.failed_count as f64 / self.total_count as f64
    }
}

impl Default for SlidingCounter {
    fn default() -> Self {
        Self::new()
    }
}
