//! The `TaskManager` façade (C4): owns the scheduler lanes, the root
//! cancellation source, the progress aggregator, and the UI thread identity.
//!
//! This module also carries the execution driver that ties C1-C3 together:
//! `drive` runs one task body to completion and then, via `cascade`, applies
//! the pure dispatch decision from [`crate::chain::dispatch_children`] to its
//! continuations. No lock is held and nothing is awaited while deciding
//! *what* to dispatch next; only the dispatch itself (enqueuing onto a lane)
//! happens inside the running task's own future.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::affinity::Affinity;
use crate::chain::{ChainCommand, Predicate, dispatch_children};
use crate::config::{ProgressConfig, SchedulerConfig};
use crate::error::TaskError;
use crate::progress::ProgressReporter;
use crate::scheduler::{LongRunningPool, SchedulerPair};
use crate::task::builder::ActionTask;
use crate::task::{Outcome, ProgressHandle, RunContext, Task, TaskBody, TaskCore, TaskOutput};
use crate::ui::{BoxedRunnable, UiSurface};

/// Owns the four execution surfaces, the root cancellation token, and the
/// progress reporter. Construct one per embedding host; `Arc`-wrap it (the
/// constructor already returns an `Arc<TaskManager>`) since scheduled tasks
/// hold a clone to dispatch their own continuations.
pub struct TaskManager {
    root_token: CancellationToken,
    scheduler_config: SchedulerConfig,
    progress_reporter: Arc<ProgressReporter>,
    pair: SchedulerPair,
    long_running: Mutex<Option<LongRunningPool>>,
    ui_thread: Arc<OnceLock<std::thread::ThreadId>>,
    ui_surface: OnceLock<Arc<dyn UiSurface>>,
    stopped: AtomicBool,
    handle: tokio::runtime::Handle,
}

impl TaskManager {
    /// Construct a manager. Must be called from within a Tokio runtime
    /// context (`tokio::runtime::Handle::try_current()` must succeed); the
    /// manager reuses that runtime for the Concurrent/Exclusive pair and for
    /// blocking-on futures dispatched onto the LongRunning and UI lanes.
    ///
    /// Fails with `TaskError::State` if `scheduler_config.long_running_workers
    /// == 0` — the degenerate zero-worker configuration that §9's open
    /// question declines to bound a deferral for is rejected up front rather
    /// than guessed at.
    pub fn new(
        scheduler_config: SchedulerConfig,
        progress_config: ProgressConfig,
    ) -> Result<Arc<Self>, TaskError> {
        if scheduler_config.long_running_workers == 0 {
            return Err(TaskError::State(
                "SchedulerConfig::long_running_workers must be >= 1".into(),
            ));
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            TaskError::State("TaskManager::new must be called inside a Tokio runtime".into())
        })?;

        let ui_thread: Arc<OnceLock<std::thread::ThreadId>> = Arc::new(OnceLock::new());
        let long_running = LongRunningPool::new(
            scheduler_config.long_running_workers,
            handle.clone(),
            ui_thread.clone(),
        );

        Ok(Arc::new(Self {
            root_token: CancellationToken::new(),
            scheduler_config,
            progress_reporter: Arc::new(ProgressReporter::new(progress_config)),
            pair: SchedulerPair::new(handle.clone()),
            long_running: Mutex::new(Some(long_running)),
            ui_thread,
            ui_surface: OnceLock::new(),
            stopped: AtomicBool::new(false),
            handle,
        }))
    }

    /// `Initialize()`: captures the calling thread as the UI thread and
    /// `ui_surface` as the UI scheduler. Must be called exactly once, before
    /// any `Affinity::Ui` task is scheduled. To satisfy "Initialize(context)
    /// posts the initialization to `context` synchronously" for a caller not
    /// already on the UI thread, post a closure that calls this method onto
    /// that thread's own `UiSurface` implementation instead of calling it
    /// directly.
    pub fn initialize(&self, ui_surface: Arc<dyn UiSurface>) -> Result<(), TaskError> {
        let this_thread = std::thread::current().id();
        self.ui_thread.set(this_thread).map_err(|_| {
            TaskError::State("TaskManager::initialize called more than once".into())
        })?;
        self.ui_surface.set(ui_surface).map_err(|_| {
            TaskError::State("TaskManager::initialize called more than once".into())
        })?;
        trace!("task manager initialized; UI thread recorded");
        Ok(())
    }

    /// `InUIThread`: true iff the calling thread equals the recorded UI
    /// thread. `false` if `initialize` was never called.
    pub fn in_ui_thread(&self) -> bool {
        self.ui_thread.get() == Some(&std::thread::current().id())
    }

    /// The root cancellation token. Cancelling it transitively cancels every
    /// live task's scoped token (each is a `child_token()` of this one).
    pub fn token(&self) -> CancellationToken {
        self.root_token.clone()
    }

    pub fn progress_reporter(&self) -> Arc<ProgressReporter> {
        self.progress_reporter.clone()
    }

    /// A scoped cancellation token suitable for building a new task that
    /// this manager will schedule.
    pub fn child_token(&self) -> CancellationToken {
        self.root_token.child_token()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// `Schedule(task) -> task`: finds the chain's head (§4.2 rooting rule),
    /// wires the fault logger onto it exactly once, and dispatches it onto
    /// its affinity's lane. Returns the task handle passed in, unchanged;
    /// idempotent if the head is already started.
    pub fn schedule<T>(self: &Arc<Self>, task: Task<T>) -> Result<Task<T>, TaskError>
    where
        T: Send + Sync + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TaskError::Shutdown);
        }
        let head = TaskCore::chain_head(task.core());
        if head.should_wire_fault_logger() {
            self.wire_fault_logger(&head);
        }
        if head.state() == crate::task::TaskState::Created {
            self.dispatch(head, true)?;
        }
        Ok(task)
    }

    /// `Run(action, msg) -> task`: a Concurrent `ActionTask` shorthand that
    /// publishes `message` as its initial progress before running `body`.
    pub fn run<F, Fut>(
        self: &Arc<Self>,
        name: impl Into<String>,
        message: impl Into<String>,
        body: F,
    ) -> Result<Task<()>, TaskError>
    where
        F: FnOnce(RunContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let message = message.into();
        let task = ActionTask::new(
            name,
            Affinity::Concurrent,
            self.child_token(),
            self.progress_reporter.clone(),
            move |ctx| {
                ctx.progress.update(0, 0, message);
                body(ctx)
            },
        );
        self.schedule(task)
    }

    /// `RunInUI(action, msg)`: same as [`Self::run`] but dispatched onto the
    /// UI lane.
    pub fn run_in_ui<F, Fut>(
        self: &Arc<Self>,
        name: impl Into<String>,
        message: impl Into<String>,
        body: F,
    ) -> Result<Task<()>, TaskError>
    where
        F: FnOnce(RunContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let message = message.into();
        let task = ActionTask::new(
            name,
            Affinity::Ui,
            self.child_token(),
            self.progress_reporter.clone(),
            move |ctx| {
                ctx.progress.update(0, 0, message);
                body(ctx)
            },
        );
        self.schedule(task)
    }

    /// `Stop()`: refuses new Concurrent/Exclusive submissions, cancels the
    /// root token, awaits drain up to `scheduler_config.shutdown_deadline`,
    /// then returns regardless of whether every worker has drained.
    pub async fn stop(self: &Arc<Self>) {
        self.stopped.store(true, Ordering::SeqCst);
        self.pair.complete();
        self.root_token.cancel();

        let drained = self
            .pair
            .wait_drained(self.scheduler_config.shutdown_deadline)
            .await;
        if !drained {
            warn!("scheduler pair did not drain within the shutdown deadline");
        }

        let pool = self.long_running.lock().unwrap().take();
        if let Some(pool) = pool {
            let _ = tokio::task::spawn_blocking(move || pool.shutdown()).await;
        }
    }

    /// Choose `core`'s lane and enqueue `drive(core, success_from_parent)`
    /// onto it. Synchronous: every lane's dispatch is "hand the future to a
    /// queue/pool", never a blocking wait.
    fn dispatch(
        self: &Arc<Self>,
        core: Arc<TaskCore>,
        success_from_parent: bool,
    ) -> Result<(), TaskError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TaskError::Shutdown);
        }
        let manager = self.clone();
        let affinity = core.affinity();
        let fut = async move { drive(manager, core, success_from_parent).await };

        match affinity {
            Affinity::Concurrent => {
                if !self.pair.dispatch_concurrent(fut) {
                    return Err(TaskError::Shutdown);
                }
            }
            Affinity::Exclusive => {
                if !self.pair.dispatch_exclusive(fut) {
                    return Err(TaskError::Shutdown);
                }
            }
            Affinity::LongRunning => {
                let guard = self.long_running.lock().unwrap();
                match guard.as_ref() {
                    Some(pool) => pool.dispatch(self.handle.clone(), fut),
                    None => return Err(TaskError::Shutdown),
                }
            }
            Affinity::Ui => {
                let surface = self
                    .ui_surface
                    .get()
                    .ok_or_else(|| {
                        TaskError::State(
                            "TaskManager::initialize must be called before scheduling a UI task"
                                .into(),
                        )
                    })?
                    .clone();
                let handle = self.handle.clone();
                let runnable: BoxedRunnable = Box::new(move || handle.block_on(fut));
                surface.post(runnable);
            }
        }
        Ok(())
    }

    /// Attach an Always-predicate continuation to every current terminus of
    /// `head`'s chain that logs any unobserved fault once that terminus is
    /// reached, dispatched on the LongRunning lane per §4.4. §7 means "the
    /// chain's terminus" literally: for a multi-node chain `a.Then(b).Then(c)`
    /// a fault raised by `b` or `c` (not just `a`) must still be logged if it
    /// reaches the end unobserved, so the logger is attached to each leaf
    /// (a task with no continuations at wiring time), not to `head` itself.
    fn wire_fault_logger(self: &Arc<Self>, head: &Arc<TaskCore>) {
        for terminus in collect_chain_leaves(head) {
            let parent = Arc::downgrade(&terminus);
            let body: crate::task::BodyFn = Box::new(move |_ctx: RunContext| {
                let parent = parent.clone();
                Box::pin(async move {
                    if let Some(parent) = parent.upgrade() {
                        // `fault()` catches a fault raised by this terminus
                        // itself; `previous_exception()` catches one carried
                        // forward from an upstream node along an
                        // Always/OnFailure edge that this terminus never
                        // itself handled.
                        if let Some(fault) = parent.fault().or_else(|| parent.previous_exception()) {
                            tracing::error!(
                                task = %parent.name(),
                                error = %fault,
                                "unobserved task fault reached chain terminus"
                            );
                        }
                    }
                    Ok(TaskOutput::None)
                })
            });
            let logger_core = TaskCore::new(
                format!("{}::fault-logger", terminus.name()),
                Affinity::LongRunning,
                self.child_token(),
                self.progress_reporter.clone(),
                TaskBody::Action(body),
            );
            TaskCore::add_continuation(&terminus, logger_core, Predicate::Always);
        }
    }
}

/// Run one task body to completion (realizing §4.1's run contract), then
/// cascade into its continuations.
async fn drive(manager: Arc<TaskManager>, core: Arc<TaskCore>, success_from_parent: bool) {
    match core.try_begin_start() {
        Ok(true) => {}
        // Already started/terminal: idempotent no-op, no extra OnStart.
        _ => return,
    }

    if core.cancel_token().is_cancelled() {
        TaskCore::finish(&core, Outcome::Canceled(Arc::new(TaskError::Cancellation)));
    } else {
        core.begin_running();
        let ctx = RunContext {
            success_from_parent,
            cancel_token: core.cancel_token().clone(),
            progress: ProgressHandle::new(&core),
            input: core.take_input(),
        };
        let outcome = match core.take_body() {
            Some(body) => {
                let result = body.into_future(ctx).await;
                TaskCore::resolve_body_result(&core, result)
            }
            None => Outcome::Faulted(Arc::new(TaskError::State(format!(
                "task '{}' has no body to run",
                core.name()
            )))),
        };
        TaskCore::finish(&core, outcome);
    }

    cascade(&manager, &core);
}

/// The Canceled-as-dependency-failed path: the task never runs its body.
async fn cancel_chain(manager: Arc<TaskManager>, core: Arc<TaskCore>) {
    match core.try_begin_start() {
        Ok(true) => {}
        _ => return,
    }
    TaskCore::finish(&core, Outcome::Canceled(Arc::new(TaskError::Dependency)));
    cascade(&manager, &core);
}

/// Apply the pure dispatch decision from `dispatch_children` to `core`'s
/// continuations: schedule matching children (propagating typed input and
/// the upstream fault first), spawn the cancellation path for the rest.
fn cascade(manager: &Arc<TaskManager>, core: &Arc<TaskCore>) {
    let state = core.state();
    let continuations = core.continuations_snapshot();
    for command in dispatch_children(state, &continuations) {
        match command {
            ChainCommand::Schedule {
                child,
                success_from_parent,
            } => {
                if let Some(fault) = core.fault().or_else(|| core.previous_exception()) {
                    child.set_previous_exception(fault);
                }
                if let Some(value) = core.output_value() {
                    child.set_input(value);
                }
                if let Err(err) = manager.dispatch(child, success_from_parent) {
                    warn!(error = %err, "failed to dispatch chain continuation");
                }
            }
            ChainCommand::CancelAsDependencyFailed { child } => {
                tokio::spawn(cancel_chain(manager.clone(), child));
            }
        }
    }
}

/// Walk every continuation edge reachable from `head`, depth-first, and
/// collect the tasks that currently have no continuations of their own —
/// the chain's terminus/termini at the moment `Schedule` is called. A linear
/// chain has exactly one; a chain that branches (multiple `Then` calls off
/// the same parent) has one per branch, and each gets its own fault logger.
fn collect_chain_leaves(head: &Arc<TaskCore>) -> Vec<Arc<TaskCore>> {
    let continuations = head.continuations_snapshot();
    if continuations.is_empty() {
        return vec![head.clone()];
    }
    continuations
        .iter()
        .flat_map(|edge| collect_chain_leaves(&edge.child))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::Affinity;
    use crate::task::{TaskBody, TaskOutput};
    use tokio_util::sync::CancellationToken;

    fn leaf(name: &str) -> Arc<TaskCore> {
        let body: crate::task::BodyFn = Box::new(|_ctx| Box::pin(async { Ok(TaskOutput::None) }));
        TaskCore::new(
            name,
            Affinity::Concurrent,
            CancellationToken::new(),
            Arc::new(crate::progress::ProgressReporter::default()),
            TaskBody::Action(body),
        )
    }

    #[test]
    fn collect_chain_leaves_returns_the_single_tail_of_a_linear_chain() {
        let a = leaf("a");
        let b = leaf("b");
        let c = leaf("c");
        TaskCore::add_continuation(&a, b.clone(), Predicate::Always);
        TaskCore::add_continuation(&b, c.clone(), Predicate::Always);

        let leaves = collect_chain_leaves(&a);
        assert_eq!(leaves.len(), 1);
        assert!(Arc::ptr_eq(&leaves[0], &c));
    }

    #[test]
    fn collect_chain_leaves_returns_one_per_branch() {
        let a = leaf("a");
        let b = leaf("b");
        let c = leaf("c");
        TaskCore::add_continuation(&a, b.clone(), Predicate::OnSuccess);
        TaskCore::add_continuation(&a, c.clone(), Predicate::OnFailure);

        let leaves = collect_chain_leaves(&a);
        assert_eq!(leaves.len(), 2);
        assert!(leaves.iter().any(|t| Arc::ptr_eq(t, &b)));
        assert!(leaves.iter().any(|t| Arc::ptr_eq(t, &c)));
    }

    #[test]
    fn collect_chain_leaves_on_a_single_node_returns_itself() {
        let a = leaf("a");
        let leaves = collect_chain_leaves(&a);
        assert_eq!(leaves.len(), 1);
        assert!(Arc::ptr_eq(&leaves[0], &a));
    }
}
