//! Crate-wide error taxonomy.

use std::sync::Arc;

use thiserror::Error;

/// The error kinds a task can fault with.
///
/// This is a concrete realization of the prose error taxonomy: cancellation,
/// dependency mismatch, user task-body failure, process spawn/exit failure,
/// illegal state transitions, and post-shutdown scheduling attempts.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task was cancelled")]
    Cancellation,

    #[error("parent did not match the child's predicate; task never ran")]
    Dependency,

    #[error("task body failed: {0}")]
    TaskBody(#[source] anyhow::Error),

    #[error("failed to spawn process: {0}")]
    ProcessSpawn(#[source] std::io::Error),

    #[error("process exited with code {exit_code}")]
    ProcessExit { exit_code: i32, stderr: String },

    #[error("illegal state transition: {0}")]
    State(String),

    #[error("manager has been shut down")]
    Shutdown,
}

/// Shared handle to a fault, cheaply cloned along chain edges so the same
/// underlying error (including any `stderr` buffer) is never duplicated.
pub type Fault = Arc<TaskError>;

pub type TaskResult<T> = std::result::Result<T, TaskError>;

impl TaskError {
    pub fn task_body(err: impl Into<anyhow::Error>) -> Self {
        TaskError::TaskBody(err.into())
    }
}
