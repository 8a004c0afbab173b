//! The ProcessTask runtime (C5): wraps an OS process as a task body.
//!
//! Grounded on the teacher's `exec::task_runner::run_task_inner` for the
//! spawn/pipe/select! shape, and on the `other_examples` `ChildGuard`
//! pattern (SIGTERM, grace period, then SIGKILL / `taskkill`) for the
//! forceful-kill half of `Stop()`.

use std::any::Any;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::affinity::Affinity;
use crate::error::TaskError;
use crate::task::events::EventList;
use crate::task::{BodyFuture, RunContext, Task, TaskBody, TaskCore, TaskOutput};

use super::environment::ProcessEnvironment;
use super::output::OutputProcessor;
use super::spec::ProcessStartSpec;

/// Grace period between closing stdin / sending SIGTERM and a forceful kill,
/// per §4.5's "short grace period" before `Stop()` escalates.
const STOP_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct ProcessStartedEvent {
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct ProcessEndedEvent {
    pub exit_code: Option<i32>,
    pub detached: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessErrorDataEvent {
    pub line: String,
}

#[derive(Debug, Clone)]
pub struct ProcessOutputEvent {
    pub line: String,
}

/// State shared between the body future (which owns the running `Child`)
/// and the public `ProcessTask<T>` handle (which exposes subscribe methods,
/// `Stop`, `Detach`, and `StandardInput`).
#[derive(Default)]
pub(crate) struct ProcessShared {
    pub on_start_process: EventList<ProcessStartedEvent>,
    pub on_end_process: EventList<ProcessEndedEvent>,
    pub on_error_data: EventList<ProcessErrorDataEvent>,
    pub on_output: EventList<ProcessOutputEvent>,
    stdin_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    errors: Mutex<String>,
    detached: AtomicBool,
    /// Wakes the body's drain loop the instant `detach()` is called, so
    /// `Detach()` drives the task to `Succeeded` immediately (§4.5, S6)
    /// instead of waiting for the process to exit or be cancelled.
    detach_signal: tokio::sync::Notify,
    stop_requested: AtomicBool,
}

impl ProcessShared {
    fn set_stdin(&self, tx: mpsc::UnboundedSender<String>) {
        *self.stdin_tx.lock().unwrap() = Some(tx);
    }

    fn push_error_line(&self, line: &str) {
        let mut errors = self.errors.lock().unwrap();
        if !errors.is_empty() {
            errors.push('\n');
        }
        errors.push_str(line);
    }

    pub fn errors(&self) -> String {
        self.errors.lock().unwrap().clone()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

/// Body-internal state for a process task: the spec, environment, installed
/// output processor, and the shared handle the public wrapper talks to.
pub(crate) struct ProcessRuntime {
    spec: ProcessStartSpec,
    env: ProcessEnvironment,
    processor: Box<dyn OutputProcessor>,
    shared: Arc<ProcessShared>,
}

impl ProcessRuntime {
    fn new(
        spec: ProcessStartSpec,
        env: ProcessEnvironment,
        processor: Box<dyn OutputProcessor>,
        shared: Arc<ProcessShared>,
    ) -> Self {
        Self {
            spec,
            env,
            processor,
            shared,
        }
    }

    pub(crate) fn run(self, ctx: RunContext) -> BodyFuture {
        Box::pin(run_process(self, ctx))
    }
}

async fn run_process(runtime: ProcessRuntime, ctx: RunContext) -> Result<TaskOutput, TaskError> {
    if !ctx.success_from_parent {
        return Err(TaskError::Dependency);
    }
    if ctx.cancel_token.is_cancelled() {
        return Err(TaskError::Cancellation);
    }

    let ProcessRuntime {
        spec,
        env,
        mut processor,
        shared,
    } = runtime;

    let cwd = spec.cwd.clone().unwrap_or_else(|| env.working_directory.clone());

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if spec.redirect_stdin {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    for (k, v) in env.environment_variables.iter().chain(spec.env_overlay.iter()) {
        cmd.env(k, v);
    }

    let mut child: Child = cmd
        .spawn()
        .map_err(TaskError::ProcessSpawn)?;

    let pid = child.id().unwrap_or(0);
    shared.on_start_process.fire(&ProcessStartedEvent { pid });
    info!(pid, program = %spec.program, "process started");

    if spec.redirect_stdin {
        if let Some(mut stdin) = child.stdin.take() {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            shared.set_stdin(tx);
            tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    if stdin.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdin.write_all(b"\n").await;
                }
            });
        }
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout_tx, mut stdout_rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = stdout {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stdout_tx.send(line).is_err() {
                    break;
                }
            }
        });
    }

    if let Some(stderr) = stderr {
        let shared = shared.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                shared.push_error_line(&line);
                shared.on_error_data.fire(&ProcessErrorDataEvent { line });
            }
        });
    }

    // Drain stdout lines into the processor while racing the child's exit,
    // the cancellation token, and an explicit `Detach()` signal. `Stop()` is
    // realized by the manager cancelling this task's scoped token: we close
    // stdin, then escalate to a kill after a grace period. `Detach()` must
    // win immediately over either of the other two (§4.5, S6), so it is
    // listed first under `biased`.
    let outcome = loop {
        tokio::select! {
            biased;
            _ = shared.detach_signal.notified() => {
                break ProcessExit::Detached;
            }
            line = stdout_rx.recv() => {
                match line {
                    Some(line) => {
                        processor.on_entry(&line);
                        shared.on_output.fire(&ProcessOutputEvent { line });
                    }
                    None => {
                        // stdout closed; keep waiting on exit/cancellation.
                    }
                }
            }
            status = child.wait() => {
                let status = status.map_err(TaskError::ProcessSpawn)?;
                // The OS pipe closes when the child exits, so the reader
                // task finishes shortly after; drain whatever it already
                // buffered (or is about to) before declaring end-of-stream,
                // otherwise a line delivered a moment after `wait()`
                // resolves is silently dropped along with the channel.
                while let Some(line) = stdout_rx.recv().await {
                    processor.on_entry(&line);
                    shared.on_output.fire(&ProcessOutputEvent { line });
                }
                break ProcessExit::Exited(status);
            }
            _ = ctx.cancel_token.cancelled() => {
                break ProcessExit::Canceled;
            }
        }
    };

    if matches!(outcome, ProcessExit::Detached) {
        // Pick up anything already buffered without blocking further —
        // detach must not wait on the (possibly still-running) process —
        // before declaring end-of-stream below.
        while let Ok(line) = stdout_rx.try_recv() {
            processor.on_entry(&line);
            shared.on_output.fire(&ProcessOutputEvent { line });
        }
    }
    processor.end_of_stream();

    match outcome {
        ProcessExit::Detached => {
            // `child` has not been waited, so the `kill_on_drop` guard would
            // otherwise kill it the instant this future drops `child` at
            // scope exit; `mem::forget` releases the handle without ever
            // running that guard, leaving the process running and
            // succeeding the task immediately rather than waiting for it to
            // exit or for a later cancellation to arrive.
            debug!(pid, "detach requested; leaving process running and succeeding immediately");
            shared.on_end_process.fire(&ProcessEndedEvent {
                exit_code: None,
                detached: true,
            });
            std::mem::forget(child);
            Ok(processor.take_result().unwrap_or(TaskOutput::Single(
                Arc::new(String::new()) as Arc<dyn Any + Send + Sync>
            )))
        }
        ProcessExit::Canceled if shared.is_detached() => {
            // `Detach()` raced with cancellation arriving before the signal
            // branch was polled; treat it the same as the dedicated
            // `Detached` arm rather than killing the process.
            debug!(pid, "cancellation observed but process is detached; leaving it running");
            shared.on_end_process.fire(&ProcessEndedEvent {
                exit_code: None,
                detached: true,
            });
            std::mem::forget(child);
            Ok(processor.take_result().unwrap_or(TaskOutput::Single(
                Arc::new(String::new()) as Arc<dyn Any + Send + Sync>
            )))
        }
        ProcessExit::Canceled => {
            debug!(pid, "cancellation observed; stopping process");
            stop_child(&mut child, &shared).await;
            shared.on_end_process.fire(&ProcessEndedEvent {
                exit_code: None,
                detached: false,
            });
            Err(TaskError::Cancellation)
        }
        ProcessExit::Exited(status) => {
            let code = status.code().unwrap_or(-1);
            shared.on_end_process.fire(&ProcessEndedEvent {
                exit_code: Some(code),
                detached: shared.is_detached(),
            });
            if code == 0 || shared.is_detached() {
                Ok(processor
                    .take_result()
                    .unwrap_or(TaskOutput::Single(
                        Arc::new(String::new()) as Arc<dyn Any + Send + Sync>
                    )))
            } else {
                Err(TaskError::ProcessExit {
                    exit_code: code,
                    stderr: shared.errors(),
                })
            }
        }
    }
}

enum ProcessExit {
    Exited(std::process::ExitStatus),
    Canceled,
    Detached,
}

/// Close stdin, wait a grace period, then forcefully kill — grounded on the
/// `ChildGuard` pattern (SIGTERM/SIGKILL on Unix, `taskkill` on Windows),
/// simplified here to Tokio's own `kill()` since the child was not placed in
/// its own process group.
async fn stop_child(child: &mut Child, shared: &ProcessShared) {
    shared.stop_requested.store(true, Ordering::SeqCst);
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.shutdown().await;
    }

    let already_exited = tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await;
    if already_exited.is_err() {
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill child process after grace period");
        }
        let _ = child.wait().await;
    }
}

/// Public, process-specialized task handle.
pub struct ProcessTask<T> {
    task: Task<T>,
    shared: Arc<ProcessShared>,
}

impl<T> Clone for ProcessTask<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> ProcessTask<T> {
    /// `Configure(spec, processor?)`. Builds a not-yet-started `ProcessTask`.
    pub fn configure(
        name: impl Into<String>,
        affinity: Affinity,
        cancel_token: tokio_util::sync::CancellationToken,
        progress_reporter: Arc<crate::progress::ProgressReporter>,
        spec: ProcessStartSpec,
        env: ProcessEnvironment,
        processor: Box<dyn OutputProcessor>,
    ) -> Self {
        let shared = Arc::new(ProcessShared::default());
        let runtime = ProcessRuntime::new(spec, env, processor, shared.clone());
        let core = TaskCore::new(
            name,
            affinity,
            cancel_token,
            progress_reporter,
            TaskBody::Process(runtime),
        );
        Self {
            task: Task::from_core(core),
            shared,
        }
    }

    pub fn task(&self) -> &Task<T> {
        &self.task
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// `Detach()`: leave the OS process running and transition Succeeded
    /// immediately. Flags `shared.detached` (so a subsequent exit or
    /// cancellation observation is also treated as success) and wakes the
    /// body's drain loop via `detach_signal`, which breaks out right away
    /// and succeeds the task rather than waiting for the process to exit or
    /// for a later cancellation to arrive.
    pub fn detach(&self) {
        self.shared.detached.store(true, Ordering::SeqCst);
        self.shared.detach_signal.notify_one();
    }

    pub fn is_detached(&self) -> bool {
        self.shared.is_detached()
    }

    /// Write a line to the process's stdin, if `redirect_stdin` was enabled
    /// and the process has started.
    pub fn write_line(&self, line: impl Into<String>) -> bool {
        if let Some(tx) = self.shared.stdin_tx.lock().unwrap().as_ref() {
            tx.send(line.into()).is_ok()
        } else {
            false
        }
    }

    pub fn errors(&self) -> String {
        self.shared.errors()
    }

    pub fn on_start_process(
        &self,
        handler: impl Fn(&ProcessStartedEvent) + Send + Sync + 'static,
    ) {
        self.shared.on_start_process.subscribe(handler);
    }

    pub fn on_end_process(&self, handler: impl Fn(&ProcessEndedEvent) + Send + Sync + 'static) {
        self.shared.on_end_process.subscribe(handler);
    }

    pub fn on_error_data(&self, handler: impl Fn(&ProcessErrorDataEvent) + Send + Sync + 'static) {
        self.shared.on_error_data.subscribe(handler);
    }

    pub fn on_output(&self, handler: impl Fn(&ProcessOutputEvent) + Send + Sync + 'static) {
        self.shared.on_output.subscribe(handler);
    }
}
