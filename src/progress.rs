//! ProgressReporter — throttled aggregator attached to the TaskManager
//! (sub-component of C2, §4.6).
//!
//! Grounded in spirit on the `other_examples` `StepGuard`/`ProgressLogger`
//! Drop-guarantee pattern (a terminal status is always emitted even on early
//! return), applied here to "the final progress update is never lost to
//! throttling" rather than to a status code.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::ProgressConfig;

/// Tracks, per task id, the last time a progress update was allowed through,
/// so that routine updates are throttled to at most one emission per
/// `throttle_interval` while a forced (final) update always goes through.
pub struct ProgressReporter {
    config: ProgressConfig,
    last_emit: Mutex<HashMap<u64, Instant>>,
}

impl ProgressReporter {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            last_emit: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a non-final progress push for `task_id` should be forwarded
    /// to subscribers right now.
    pub(crate) fn should_emit(&self, task_id: u64, force: bool) -> bool {
        let mut map = self.last_emit.lock().unwrap();
        let now = Instant::now();
        if force {
            map.insert(task_id, now);
            return true;
        }
        match map.get(&task_id) {
            Some(last) if now.duration_since(*last) < self.config.throttle_interval => false,
            _ => {
                map.insert(task_id, now);
                true
            }
        }
    }

    /// Reset throttle state for a task id ("reset at Start").
    pub(crate) fn reset(&self, task_id: u64) {
        self.last_emit.lock().unwrap().remove(&task_id);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(ProgressConfig::default())
    }
}
