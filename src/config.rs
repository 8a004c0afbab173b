//! Settings structs for the scheduler and progress reporter.
//!
//! This crate is embedded rather than driven by a config file, so
//! "configuration" takes the shape of plain `Default`-able settings structs
//! rather than a TOML document: a caller that wants file-backed config can
//! deserialize these with `serde` from whatever format it already uses.

use std::time::Duration;

use serde::Deserialize;

/// Sizing and shutdown knobs for the affinity scheduler pair.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of dedicated worker threads backing the `LongRunning` lane.
    ///
    /// Must be at least 1: the "exclude the UI thread" rule (4.3) requires at
    /// least one non-UI worker to exist, or dispatch would defer forever. The
    /// spec explicitly declines to bound that deferral, so this crate turns
    /// the degenerate zero-worker configuration into an upfront `StateError`
    /// at `TaskManager::initialize` instead of guessing a timeout.
    pub long_running_workers: usize,

    /// Deadline `TaskManager::stop` waits for the exclusive/concurrent pair
    /// to drain before returning regardless (spec §4.3: 500 ms).
    pub shutdown_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            long_running_workers: 2,
            shutdown_deadline: Duration::from_millis(500),
        }
    }
}

/// Throttling knobs for the `ProgressReporter`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Minimum spacing between emitted progress events for the same task
    /// (spec §4.6: at most one emission per 100 ms per task).
    pub throttle_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(100),
        }
    }
}
