//! `taskforge`: a task orchestration kernel for an interactive host with one
//! privileged UI thread.
//!
//! Compose in-process actions, long-running compute, and external
//! subprocesses into directed chains with typed data flow, affinity-
//! controlled execution, progress reporting, cooperative cancellation, and
//! structured failure propagation.
//!
//! Start with [`manager::TaskManager`]: construct one, `initialize()` it on
//! the host's UI thread, then build tasks with [`task::builder::ActionTask`],
//! [`task::builder::FuncTask`], [`process::ProcessTask`], or
//! [`queue::TaskQueueBuilder`] and `schedule()` them.

pub mod affinity;
pub mod chain;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod process;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod ui;

pub use affinity::Affinity;
pub use chain::Predicate;
pub use config::{ProgressConfig, SchedulerConfig};
pub use error::{Fault, TaskError, TaskResult};
pub use manager::TaskManager;
pub use task::{Task, TaskState};
pub use ui::UiSurface;
