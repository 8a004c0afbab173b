//! Fluent task builders for tests: wrap [`taskforge::task::builder::ActionTask`]
//! / [`taskforge::task::builder::FuncTask`] so a test can pick an affinity and
//! a body without repeating the manager's cancellation token / progress
//! reporter plumbing at every call site.

use std::future::Future;
use std::sync::Arc;

use taskforge::affinity::Affinity;
use taskforge::error::TaskError;
use taskforge::manager::TaskManager;
use taskforge::task::builder::{ActionTask, FuncTask};
use taskforge::task::{RunContext, Task};

/// Builds a `Task<()>` ("action" result type) for a test.
pub struct ActionTaskBuilder {
    name: String,
    affinity: Affinity,
}

impl ActionTaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affinity: Affinity::Concurrent,
        }
    }

    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn exclusive(self) -> Self {
        self.affinity(Affinity::Exclusive)
    }

    pub fn long_running(self) -> Self {
        self.affinity(Affinity::LongRunning)
    }

    pub fn ui(self) -> Self {
        self.affinity(Affinity::Ui)
    }

    pub fn build<F, Fut>(self, manager: &Arc<TaskManager>, body: F) -> Task<()>
    where
        F: FnOnce(RunContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        ActionTask::new(
            self.name,
            self.affinity,
            manager.child_token(),
            manager.progress_reporter(),
            body,
        )
    }
}

/// Builds a `Task<T>` producing a single typed result for a test.
pub struct FuncTaskBuilder {
    name: String,
    affinity: Affinity,
}

impl FuncTaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affinity: Affinity::Concurrent,
        }
    }

    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn exclusive(self) -> Self {
        self.affinity(Affinity::Exclusive)
    }

    pub fn long_running(self) -> Self {
        self.affinity(Affinity::LongRunning)
    }

    pub fn ui(self) -> Self {
        self.affinity(Affinity::Ui)
    }

    pub fn build<T, F, Fut>(self, manager: &Arc<TaskManager>, body: F) -> Task<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(RunContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        FuncTask::new(
            self.name,
            self.affinity,
            manager.child_token(),
            manager.progress_reporter(),
            body,
        )
    }
}
