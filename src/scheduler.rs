//! The affinity scheduler pair (C1): four execution surfaces a task can be
//! routed to.
//!
//! Concurrent/Exclusive share one `tokio::sync::RwLock<()>`-gated pool:
//! Concurrent runnables take a read guard, Exclusive runnables take a write
//! guard. `tokio::sync::RwLock` is writer-preferring (a pending writer blocks
//! new readers from acquiring), which gives "no concurrent task runs while an
//! exclusive one runs" for free instead of a hand-rolled gate. LongRunning is
//! a fixed pool of dedicated OS threads, each blocking on `Handle::block_on`
//! for the lifetime of whatever it's running — grounded in §5's own note that
//! `ProcessTask` bodies block a worker thread for the process lifetime.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

/// Concurrent/Exclusive lane pair: a reader-writer gate plus a
/// [`TaskTracker`] so `Stop()` can await drain.
pub(crate) struct SchedulerPair {
    gate: Arc<RwLock<()>>,
    tracker: TaskTracker,
    handle: tokio::runtime::Handle,
}

impl SchedulerPair {
    pub(crate) fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            gate: Arc::new(RwLock::new(())),
            tracker: TaskTracker::new(),
            handle,
        }
    }

    /// Submit a Concurrent runnable: acquires a read guard, so it runs
    /// alongside other Concurrent runnables but never while an Exclusive
    /// runnable holds the write guard.
    ///
    /// Returns `false` (instead of panicking) if the pair has already been
    /// `complete()`d; callers surface this as `TaskError::Shutdown`.
    pub(crate) fn dispatch_concurrent<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return false;
        }
        let gate = self.gate.clone();
        self.tracker.spawn_on(
            async move {
                let _read = gate.read().await;
                job.await;
            },
            &self.handle,
        );
        true
    }

    /// Submit an Exclusive runnable: acquires the write guard, so at most
    /// one Exclusive runnable runs at a time and no Concurrent runnable runs
    /// concurrently with it.
    pub(crate) fn dispatch_exclusive<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return false;
        }
        let gate = self.gate.clone();
        self.tracker.spawn_on(
            async move {
                let _write = gate.write().await;
                job.await;
            },
            &self.handle,
        );
        true
    }

    /// `Complete()`: refuse any further submissions. Idempotent.
    pub(crate) fn complete(&self) {
        self.tracker.close();
    }

    /// Await every in-flight Concurrent/Exclusive runnable finishing, up to
    /// `deadline`. Returns `true` if the pair drained in time.
    pub(crate) async fn wait_drained(&self, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, self.tracker.wait())
            .await
            .is_ok()
    }
}

type LongRunningJob = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of dedicated OS threads backing the LongRunning lane.
///
/// Each worker is a freshly spawned `std::thread`, so by construction none of
/// them is ever the thread recorded as the UI thread — the "defer until
/// another worker is available" rule from §4.3 therefore never actually
/// triggers for this pool; the check is kept anyway as a defensive assertion
/// against a misconfigured UI thread that somehow matches a worker (see the
/// open-question resolution in `SPEC_FULL.md` §9).
pub(crate) struct LongRunningPool {
    senders: Vec<std::sync::mpsc::Sender<LongRunningJob>>,
    threads: Vec<std::thread::JoinHandle<()>>,
    next: AtomicUsize,
}

impl LongRunningPool {
    /// Spawn `worker_count` dedicated threads, each driving futures handed
    /// to it via `Handle::block_on`. `worker_count` must be at least 1; the
    /// caller (`TaskManager::new`) rejects 0 eagerly as a `StateError`
    /// rather than modeling an unbounded deferral.
    pub(crate) fn new(
        worker_count: usize,
        handle: tokio::runtime::Handle,
        ui_thread: Arc<OnceLock<std::thread::ThreadId>>,
    ) -> Self {
        debug_assert!(worker_count > 0, "LongRunningPool requires >= 1 worker");
        let mut senders = Vec::with_capacity(worker_count);
        let mut threads = Vec::with_capacity(worker_count);

        for idx in 0..worker_count {
            let (tx, rx) = std::sync::mpsc::channel::<LongRunningJob>();
            let handle = handle.clone();
            let ui_thread = ui_thread.clone();
            let thread = std::thread::Builder::new()
                .name(format!("taskforge-longrunning-{idx}"))
                .spawn(move || {
                    let this_thread = std::thread::current().id();
                    if ui_thread.get() == Some(&this_thread) {
                        // Unreachable by construction (see doc comment), but
                        // honor the "never on the UI thread" invariant if it
                        // somehow happens rather than silently running there.
                        warn!("long-running worker thread matches the recorded UI thread");
                    }
                    while let Ok(job) = rx.recv() {
                        let _guard = handle.enter();
                        job();
                    }
                    trace!(worker = idx, "long-running worker shut down");
                })
                .expect("failed to spawn long-running worker thread");
            senders.push(tx);
            threads.push(thread);
        }

        Self {
            senders,
            threads,
            next: AtomicUsize::new(0),
        }
    }

    /// Dispatch `fut` onto the next worker (round-robin) to run to
    /// completion via `Handle::block_on`.
    pub(crate) fn dispatch<F>(&self, handle: tokio::runtime::Handle, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        let job: LongRunningJob = Box::new(move || {
            handle.block_on(fut);
        });
        if self.senders[idx].send(job).is_err() {
            debug!(worker = idx, "long-running worker channel closed; dropping job");
        }
    }

    /// Close every worker's channel and join its thread. Used by
    /// `TaskManager::stop` after the Concurrent/Exclusive pair has drained.
    pub(crate) fn shutdown(self) {
        drop(self.senders);
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}
