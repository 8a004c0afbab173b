//! The UI execution surface (the fourth of C1's four lanes).
//!
//! Abstracted as a "post a runnable onto the thread owning surface X"
//! capability, per §9's design note, mirroring the teacher's
//! `FileSystem`/`ExecutorBackend` trait-for-testability split: production
//! code supplies a host-provided implementation (a winit/egui/GTK main-loop
//! post), tests supply an in-process fake.

use std::fmt;

/// A boxed, type-erased unit of work posted onto the UI surface.
pub type BoxedRunnable = Box<dyn FnOnce() + Send + 'static>;

/// The host's single-threaded scheduler. `TaskManager::initialize` captures
/// both the identity of the calling thread and an implementation of this
/// trait as "the UI scheduler".
pub trait UiSurface: Send + Sync {
    /// Post `runnable` onto the surface's owning thread. Implementations
    /// must eventually invoke `runnable` on that thread; this crate does not
    /// assume synchronous delivery.
    fn post(&self, runnable: BoxedRunnable);
}

impl fmt::Debug for dyn UiSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn UiSurface")
    }
}
