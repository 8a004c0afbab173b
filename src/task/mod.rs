//! The task state machine (C2) and its type-erased core record.
//!
//! Per the redesign note in the specification: the source models tasks as a
//! deep class hierarchy (`TaskBase -> TaskBase<T> -> FuncTask<T> ->
//! ProcessTask<T>`). Here that collapses into one concrete record,
//! [`TaskCore`], plus a tagged [`TaskBody`] enum; "process-ness" is a body
//! variant with an associated runtime, not a subclass. Typed public handles
//! ([`Task<T>`]) are thin `PhantomData`-tagged wrappers around `Arc<TaskCore>`
//! providing a typed `result()` accessor over the type-erased storage.

pub mod builder;
pub mod events;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::affinity::Affinity;
use crate::chain::{Continuation, Predicate};
use crate::error::{Fault, TaskError};
use crate::process::ProcessRuntime;
use crate::progress::ProgressReporter;
use crate::queue::QueueBody;

use events::{EndEvent, EventList, HandlerId, ProgressEvent, StartEvent};

/// Lifecycle states a task passes through. Transitions are a prefix of
/// `Created, Started, Running, {Succeeded | Faulted | Canceled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Started,
    Running,
    Succeeded,
    Faulted,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Faulted | TaskState::Canceled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A type-erased single value or accumulated aggregate produced by a task
/// body. `Task<T>` downcasts this back to `T` for its typed accessors.
#[derive(Clone)]
pub enum TaskOutput {
    /// The "action" result type: no value.
    None,
    /// A single typed value.
    Single(Arc<dyn Any + Send + Sync>),
    /// A streamed sequence of typed items accumulated into an aggregate.
    Aggregate(Vec<Arc<dyn Any + Send + Sync>>),
}

impl fmt::Debug for TaskOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutput::None => write!(f, "TaskOutput::None"),
            TaskOutput::Single(_) => write!(f, "TaskOutput::Single(..)"),
            TaskOutput::Aggregate(items) => {
                write!(f, "TaskOutput::Aggregate(len={})", items.len())
            }
        }
    }
}

/// The outcome stored exactly once, at the terminal transition.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Succeeded(TaskOutput),
    Faulted(Fault),
    Canceled(Fault),
}

impl Outcome {
    pub(crate) fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    pub(crate) fn fault(&self) -> Option<Fault> {
        match self {
            Outcome::Faulted(e) | Outcome::Canceled(e) => Some(e.clone()),
            Outcome::Succeeded(_) => None,
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        match self {
            Outcome::Succeeded(_) => TaskState::Succeeded,
            Outcome::Faulted(_) => TaskState::Faulted,
            Outcome::Canceled(_) => TaskState::Canceled,
        }
    }
}

/// `(current, total, message)`, monotone non-decreasing `current` per task
/// until reset at `Start`.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    pub message: String,
}

/// Input passed to a task body when the scheduler runs it.
pub struct RunContext {
    /// `true` when there is no parent, else the parent's terminal success
    /// flag (`parent.Succeeded`).
    pub success_from_parent: bool,
    /// This task's scoped cancellation token (a child of the manager's root
    /// token).
    pub cancel_token: CancellationToken,
    /// Handle for pushing progress updates to the manager's reporter.
    pub progress: ProgressHandle,
    /// The parent's typed result, set only for chain edges built with
    /// [`crate::chain::ThenMap`] / `Task::then_map`.
    pub input: Option<Arc<dyn Any + Send + Sync>>,
}

/// A cheap handle a running task body uses to publish progress.
#[derive(Clone)]
pub struct ProgressHandle {
    core: Weak<TaskCore>,
}

impl ProgressHandle {
    pub(crate) fn new(core: &Arc<TaskCore>) -> Self {
        Self {
            core: Arc::downgrade(core),
        }
    }

    pub fn update(&self, current: u64, total: u64, message: impl Into<String>) {
        if let Some(core) = self.core.upgrade() {
            core.push_progress(current, total, message.into());
        }
    }
}

pub(crate) type BodyFuture = Pin<Box<dyn Future<Output = Result<TaskOutput, TaskError>> + Send>>;
pub(crate) type BodyFn = Box<dyn FnOnce(RunContext) -> BodyFuture + Send>;

/// The tagged variant of task bodies (§9 redesign note): process-ness and
/// queue-ness are capabilities of a body, not subclasses of `Task`.
pub(crate) enum TaskBody {
    Action(BodyFn),
    Func(BodyFn),
    Process(ProcessRuntime),
    Queue(QueueBody),
}

impl TaskBody {
    /// Dispatch to the right execution path regardless of body kind; the
    /// scheduler's IO shell only ever calls this one method.
    pub(crate) fn into_future(self, ctx: RunContext) -> BodyFuture {
        match self {
            TaskBody::Action(f) | TaskBody::Func(f) => f(ctx),
            TaskBody::Process(runtime) => runtime.run(ctx),
            TaskBody::Queue(queue) => queue.run(ctx),
        }
    }
}

/// A fault handler: `(Exception) -> handled`. Handlers run in registration
/// order until one returns `true`.
pub type FaultHandler = Box<dyn Fn(&TaskError) -> bool + Send + Sync>;

/// The concrete, non-generic task record. All public `Task<T>` handles
/// share one of these behind an `Arc`.
pub struct TaskCore {
    id: OnceLock<u64>,
    name: String,
    affinity: Affinity,
    state: Mutex<TaskState>,
    body: Mutex<Option<TaskBody>>,
    continuations: Mutex<Vec<Continuation>>,
    parent: Mutex<Option<Weak<TaskCore>>>,
    cancel_token: CancellationToken,
    progress: Mutex<Progress>,
    outcome: OnceLock<Outcome>,
    fault_handlers: Mutex<Vec<FaultHandler>>,
    previous_exception: Mutex<Option<Fault>>,
    input_slot: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    terminal_notify: tokio::sync::Notify,
    fault_logger_wired: Mutex<bool>,
    progress_reporter: Arc<ProgressReporter>,

    pub(crate) on_start: EventList<StartEvent>,
    pub(crate) on_end: EventList<EndEvent>,
    pub(crate) on_progress: EventList<ProgressEvent>,
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskCore {
    pub(crate) fn new(
        name: impl Into<String>,
        affinity: Affinity,
        cancel_token: CancellationToken,
        progress_reporter: Arc<ProgressReporter>,
        body: TaskBody,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: OnceLock::new(),
            name: name.into(),
            affinity,
            state: Mutex::new(TaskState::Created),
            body: Mutex::new(Some(body)),
            continuations: Mutex::new(Vec::new()),
            parent: Mutex::new(None),
            cancel_token,
            progress: Mutex::new(Progress::default()),
            outcome: OnceLock::new(),
            fault_handlers: Mutex::new(Vec::new()),
            previous_exception: Mutex::new(None),
            input_slot: Mutex::new(None),
            terminal_notify: tokio::sync::Notify::new(),
            fault_logger_wired: Mutex::new(false),
            progress_reporter,
            on_start: EventList::new(),
            on_end: EventList::new(),
            on_progress: EventList::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap()
    }

    /// Assigned the first time the task transitions past `Created`.
    pub fn id(&self) -> Option<u64> {
        self.id.get().copied()
    }

    fn assign_id(&self) -> u64 {
        *self
            .id
            .get_or_init(|| NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn progress(&self) -> Progress {
        self.progress.lock().unwrap().clone()
    }

    pub(crate) fn push_progress(&self, current: u64, total: u64, message: String) {
        let current = {
            let mut guard = self.progress.lock().unwrap();
            // "monotone non-decreasing current per task id until reset at Start"
            guard.current = guard.current.max(current);
            guard.total = total;
            guard.message = message.clone();
            guard.current
        };
        let Some(id) = self.id() else { return };
        if self.progress_reporter.should_emit(id, false) {
            self.on_progress.fire(&ProgressEvent {
                task_id: id,
                current,
                total,
                message,
            });
        }
    }

    /// Force-emit the latest progress snapshot, bypassing the throttle.
    /// Called once on terminal transition so "always emitting the final
    /// update" holds even if the last `push_progress` call was coalesced.
    fn flush_final_progress(&self) {
        let Some(id) = self.id() else { return };
        let snapshot = self.progress.lock().unwrap().clone();
        if self.progress_reporter.should_emit(id, true) {
            self.on_progress.fire(&ProgressEvent {
                task_id: id,
                current: snapshot.current,
                total: snapshot.total,
                message: snapshot.message,
            });
        }
    }

    pub fn catch(&self, handler: impl Fn(&TaskError) -> bool + Send + Sync + 'static) {
        self.fault_handlers.lock().unwrap().push(Box::new(handler));
    }

    /// Run registered fault handlers in order; returns `true` if one
    /// reported the fault handled.
    fn run_fault_handlers(&self, err: &TaskError) -> bool {
        let handlers = self.fault_handlers.lock().unwrap();
        for handler in handlers.iter() {
            if handler(err) {
                return true;
            }
        }
        false
    }

    pub fn previous_exception(&self) -> Option<Fault> {
        self.previous_exception.lock().unwrap().clone()
    }

    pub(crate) fn set_previous_exception(&self, fault: Fault) {
        *self.previous_exception.lock().unwrap() = Some(fault);
    }

    pub(crate) fn add_continuation(
        self_arc: &Arc<TaskCore>,
        child: Arc<TaskCore>,
        predicate: Predicate,
    ) {
        child.set_parent(Arc::downgrade(self_arc));
        self_arc
            .continuations
            .lock()
            .unwrap()
            .push(Continuation { child, predicate });
    }

    fn set_parent(&self, parent: Weak<TaskCore>) {
        *self.parent.lock().unwrap() = Some(parent);
    }

    pub(crate) fn parent(&self) -> Option<Arc<TaskCore>> {
        self.parent.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn continuations_snapshot(&self) -> Vec<Continuation> {
        self.continuations.lock().unwrap().clone()
    }

    /// Walk parent links to the chain's head (the unique ancestor with no
    /// parent).
    pub(crate) fn chain_head(self_arc: &Arc<TaskCore>) -> Arc<TaskCore> {
        let mut current = self_arc.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub(crate) fn should_wire_fault_logger(&self) -> bool {
        let mut wired = self.fault_logger_wired.lock().unwrap();
        if *wired {
            false
        } else {
            *wired = true;
            true
        }
    }

    /// Validate and perform `Created -> Started`. Returns `false` (a no-op)
    /// if the task was already started, matching "Start is idempotent only
    /// in that calling it on a task that is already Started returns the
    /// same handle; it never re-runs."
    pub(crate) fn try_begin_start(&self) -> Result<bool, TaskError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            TaskState::Created => {
                *state = TaskState::Started;
                drop(state);
                let id = self.assign_id();
                self.progress_reporter.reset(id);
                Ok(true)
            }
            _ if state.is_terminal() || *state == TaskState::Started || *state == TaskState::Running => {
                Ok(false)
            }
            // unreachable in practice since the match above is exhaustive for
            // the remaining variants, kept for clarity.
            _ => Err(TaskError::State(format!(
                "cannot start task '{}' from state {:?}",
                self.name, *state
            ))),
        }
    }

    pub(crate) fn begin_running(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(*state, TaskState::Started);
        *state = TaskState::Running;
        drop(state);
        if let Some(id) = self.id() {
            trace!(task = %self.name, id, "task running");
            self.on_start.fire(&StartEvent { task_id: id });
        }
    }

    /// Store the terminal outcome (exactly once), fire `OnEnd`, and clear
    /// handler lists to break any self-capturing closure cycles.
    pub(crate) fn finish(self_arc: &Arc<TaskCore>, outcome: Outcome) {
        let state = outcome.state();
        {
            let mut guard = self_arc.state.lock().unwrap();
            *guard = state;
        }
        let fault = outcome.fault();
        let success = outcome.is_success();
        if self_arc.outcome.set(outcome).is_err() {
            // Already finished; OnEnd must fire exactly once (invariant 7).
            return;
        }
        if let Some(ref f) = fault {
            self_arc.set_previous_exception(f.clone());
        }
        let id = self_arc.id().unwrap_or_default();
        trace!(task = %self_arc.name, id, ?state, "task finished");
        self_arc.flush_final_progress();
        self_arc.on_end.fire(&EndEvent {
            task_id: id,
            success,
            fault,
        });
        self_arc.on_start.clear();
        self_arc.on_end.clear();
        self_arc.on_progress.clear();
        self_arc.terminal_notify.notify_waiters();
    }

    pub(crate) fn outcome(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    /// The erased single-value output, if this task succeeded with one.
    /// Used to feed `Task::then_map` chain edges.
    pub(crate) fn output_value(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        match self.outcome()? {
            Outcome::Succeeded(TaskOutput::Single(v)) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.outcome().map(Outcome::is_success).unwrap_or(false)
    }

    pub fn fault(&self) -> Option<Fault> {
        self.outcome().and_then(Outcome::fault)
    }

    /// Await the task reaching a terminal state.
    pub async fn join(&self) {
        loop {
            if self.state().is_terminal() {
                return;
            }
            let notified = self.terminal_notify.notified();
            if self.state().is_terminal() {
                return;
            }
            notified.await;
        }
    }

    /// Write the parent's typed output into this task's input slot ahead of
    /// scheduling, for chain edges built with `Task::then_map`. Edges built
    /// with plain `Task::then` have bodies that never read `ctx.input`, so
    /// setting it unconditionally here is harmless for them.
    pub(crate) fn set_input(&self, value: Arc<dyn Any + Send + Sync>) {
        *self.input_slot.lock().unwrap() = Some(value);
    }

    pub(crate) fn take_input(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.input_slot.lock().unwrap().take()
    }

    pub(crate) fn take_body(&self) -> Option<TaskBody> {
        self.body.lock().unwrap().take()
    }

    pub(crate) fn with_body<R>(&self, f: impl FnOnce(&mut Option<TaskBody>) -> R) -> R {
        f(&mut self.body.lock().unwrap())
    }

    /// Handle fault handlers then decide the terminal outcome for a body
    /// result, matching 4.1's fault-handling rule.
    pub(crate) fn resolve_body_result(
        self_arc: &Arc<TaskCore>,
        result: Result<TaskOutput, TaskError>,
    ) -> Outcome {
        match result {
            Ok(output) => Outcome::Succeeded(output),
            // Cooperative cancellation and unmet-dependency short-circuits
            // observed *inside* a running body are not faults in the §7
            // taxonomy sense: they bypass fault handlers entirely and land
            // directly in Canceled, matching the outcome `cancel_chain`
            // already produces for children that never ran at all.
            Err(err @ TaskError::Cancellation) | Err(err @ TaskError::Dependency) => {
                Outcome::Canceled(Arc::new(err))
            }
            Err(err) => {
                if self_arc.run_fault_handlers(&err) {
                    // A handler claimed it: the source still records a
                    // terminal Faulted state (the fault is *suppressed from
                    // downstream OnFailure edges*, not from the task's own
                    // state) by construction of dispatch_children, which
                    // only consults the *child's own* predicate against the
                    // parent's terminal state, so we special-case here:
                    // a handled fault succeeds the task instead, ensuring
                    // "A fault handler returning true suppresses downstream
                    // OnFailure edges" (OnSuccess then matches instead).
                    Outcome::Succeeded(TaskOutput::None)
                } else {
                    Outcome::Faulted(Arc::new(err))
                }
            }
        }
    }

}

/// A typed, cheaply-cloneable handle onto a [`TaskCore`].
///
/// Cloning a `Task<T>` clones the `Arc`, aliasing the same underlying state;
/// it does not duplicate the task.
pub struct Task<T> {
    pub(crate) core: Arc<TaskCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.core.name)
            .field("state", &self.core.state())
            .finish()
    }
}

impl<T> Task<T> {
    pub(crate) fn from_core(core: Arc<TaskCore>) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    pub fn core(&self) -> &Arc<TaskCore> {
        &self.core
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    pub fn is_successful(&self) -> bool {
        self.core.is_successful()
    }

    pub fn fault(&self) -> Option<Fault> {
        self.core.fault()
    }

    pub fn on_start(&self, handler: impl Fn(&StartEvent) + Send + Sync + 'static) -> HandlerId {
        self.core.on_start.subscribe(handler)
    }

    pub fn unsubscribe_on_start(&self, id: HandlerId) {
        self.core.on_start.unsubscribe(id)
    }

    pub fn on_end(&self, handler: impl Fn(&EndEvent) + Send + Sync + 'static) -> HandlerId {
        self.core.on_end.subscribe(handler)
    }

    pub fn unsubscribe_on_end(&self, id: HandlerId) {
        self.core.on_end.unsubscribe(id)
    }

    pub fn on_progress(&self, handler: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> HandlerId {
        self.core.on_progress.subscribe(handler)
    }

    pub fn unsubscribe_on_progress(&self, id: HandlerId) {
        self.core.on_progress.unsubscribe(id)
    }

    pub fn catch(&self, handler: impl Fn(&TaskError) -> bool + Send + Sync + 'static) -> &Self {
        self.core.catch(handler);
        self
    }

    pub async fn join(&self) {
        self.core.join().await
    }

    fn attach(&self, child_core: Arc<TaskCore>, predicate: Predicate) {
        TaskCore::add_continuation(&self.core, child_core, predicate);
    }

    /// `parent.Then(child, predicate)`: attach `child` with no typed data
    /// flow (only `success_from_parent` is threaded through). Returns
    /// `child` so calls compose left to right.
    pub fn then<U>(&self, child: Task<U>, predicate: Predicate) -> Task<U> {
        self.attach(child.core.clone(), predicate);
        child
    }

    /// `Finally(f)`: shorthand for `Then(f, Always)`.
    pub fn finally<U>(&self, child: Task<U>) -> Task<U> {
        self.then(child, Predicate::Always)
    }
}

impl<T: Send + Sync + 'static> Task<T> {
    /// Typed data-flow edge: `Task<T>.Then(Task<T,U>)` in the specification.
    /// `make_child` receives the parent's downcast result and builds the
    /// child's body; the parent's output is written into the child's input
    /// slot before the child is scheduled (done by the chain dispatcher, see
    /// `crate::chain`).
    pub fn then_map<U>(
        &self,
        name: impl Into<String>,
        affinity: Affinity,
        predicate: Predicate,
        cancel_token: CancellationToken,
        progress_reporter: Arc<ProgressReporter>,
        make_child: impl FnOnce(RunContext, Arc<T>) -> BodyFuture + Send + 'static,
    ) -> Task<U> {
        let body: BodyFn = Box::new(move |ctx| {
            let input = ctx.input.clone();
            Box::pin(async move {
                let typed = input
                    .and_then(|v| v.downcast::<T>().ok())
                    .ok_or_else(|| {
                        TaskError::State("typed chain input missing or wrong type".into())
                    })?;
                make_child(ctx, typed).await
            })
        });
        let core = TaskCore::new(
            name,
            affinity,
            cancel_token,
            progress_reporter,
            TaskBody::Func(body),
        );
        let child = Task::from_core(core);
        self.attach(child.core.clone(), predicate);
        child
    }

    /// The task's typed result, available once it has `Succeeded`.
    pub fn result(&self) -> Option<Arc<T>> {
        match self.core.outcome()? {
            Outcome::Succeeded(TaskOutput::Single(v)) => v.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// The accumulated aggregate, for stream-valued tasks (e.g. `TaskQueue`).
    pub fn aggregate(&self) -> Option<Vec<Arc<T>>> {
        match self.core.outcome()? {
            Outcome::Succeeded(TaskOutput::Aggregate(items)) => items
                .iter()
                .cloned()
                .map(|v| v.downcast::<T>().ok())
                .collect(),
            _ => None,
        }
    }
}
