//! Per-entity periodic scheduler.
//!
//! # Responsibilities
//! - Fire a callback per scheduled entity at its configured period
//! - Hold all fires until `start()` releases scheduling
//! - Apply period changes and removals without touching running callbacks
//!
//! # Design Decisions
//! - One task per entity; the entry map lock is never held across a fire
//! - Unscheduling cancels future fires only; an in-flight callback runs
//!   to completion
//! - The period is re-read before every sleep, so a change applies to the
//!   next fire

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Callback invoked on every fire.
pub type ScheduledCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Entry {
    period: Arc<Mutex<Duration>>,
    cancel: CancellationToken,
}

/// Monotonic timer map keyed by entity id.
pub struct EntityScheduler {
    entries: Mutex<HashMap<String, Entry>>,
    started: watch::Sender<bool>,
}

impl EntityScheduler {
    pub fn new() -> Self {
        let (started, _) = watch::channel(false);
        Self {
            entries: Mutex::new(HashMap::new()),
            started,
        }
    }

    /// Begin firing. Called exactly once, after the initial synchronous
    /// probe pass; entities scheduled later fire immediately on period.
    pub fn start(&self) {
        self.started.send_replace(true);
    }

    pub fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    /// Whether the entity currently has a timer.
    pub fn is_scheduled(&self, entity_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(entity_id)
    }

    /// Schedule an entity. Re-scheduling an existing id replaces its timer.
    pub fn schedule(&self, entity_id: impl Into<String>, period: Duration, callback: ScheduledCallback) {
        let entity_id = entity_id.into();
        let period = Arc::new(Mutex::new(period));
        let cancel = CancellationToken::new();

        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(previous) = entries.insert(
                entity_id.clone(),
                Entry {
                    period: period.clone(),
                    cancel: cancel.clone(),
                },
            ) {
                previous.cancel.cancel();
            }
        }

        let mut started = self.started.subscribe();
        tokio::spawn(async move {
            // Park until the scheduler is released.
            loop {
                if *started.borrow() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = started.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            loop {
                let delay = *period.lock().unwrap();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if cancel.is_cancelled() {
                    break;
                }
                // Cancellation during the callback only removes future fires.
                callback().await;
                if cancel.is_cancelled() {
                    break;
                }
            }
        });
    }

    /// Change an entity's period, effective from the next fire.
    pub fn change_period(&self, entity_id: &str, period: Duration) {
        let entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(entity_id) {
            *entry.period.lock().unwrap() = period;
        }
    }

    /// Remove an entity's future fires.
    pub fn unschedule(&self, entity_id: &str) {
        let removed = self.entries.lock().unwrap().remove(entity_id);
        if let Some(entry) = removed {
            entry.cancel.cancel();
        }
    }
}

impl Default for EntityScheduler {
    fn default() -> Self {
        Self::new()
    }
}
