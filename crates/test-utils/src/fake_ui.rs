//! An in-process fake of [`taskforge::ui::UiSurface`] for tests, grounded on
//! the teacher's `ExecutorBackend`/`FileSystem` trait-for-testability split:
//! production code injects a host main-loop post, tests inject this instead.

use std::sync::Mutex;

use taskforge::ui::{BoxedRunnable, UiSurface};

/// Runs every posted runnable immediately, synchronously, on the calling
/// thread, and records the id of that thread so a test can assert
/// `manager.in_ui_thread()` held true while the runnable executed.
#[derive(Default)]
pub struct FakeUiSurface {
    invocations: Mutex<Vec<std::thread::ThreadId>>,
}

impl FakeUiSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    /// `true` if every recorded invocation happened on the same thread that
    /// is calling this method right now (typically the test's own thread,
    /// which is also the thread that called `TaskManager::initialize`).
    pub fn all_invocations_on_current_thread(&self) -> bool {
        let current = std::thread::current().id();
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .all(|id| *id == current)
    }
}

impl UiSurface for FakeUiSurface {
    fn post(&self, runnable: BoxedRunnable) {
        self.invocations
            .lock()
            .unwrap()
            .push(std::thread::current().id());
        runnable();
    }
}
