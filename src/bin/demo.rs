//! `taskforge-demo`: a small host embedding the kernel directly, showing a
//! typed chain, an `Exclusive`-affinity step, and a `ProcessTask` wired
//! together the way a real desktop host would compose them at startup.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;

use taskforge::process::{LineOutputProcessor, ProcessEnvironment, ProcessStartSpec, ProcessTask};
use taskforge::{Affinity, Predicate, SchedulerConfig, TaskManager};

/// Command-line arguments for `taskforge-demo`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskforge-demo",
    version,
    about = "Run a small chained-task demo against the taskforge kernel.",
    long_about = None
)]
struct CliArgs {
    /// Program to run as the demo's `ProcessTask` step.
    #[arg(long, default_value = "echo")]
    program: String,

    /// Arguments passed to `--program`.
    #[arg(long, default_value = "taskforge demo process step")]
    program_arg: String,

    /// Logging level (error, warn, info, debug, trace).
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Number of dedicated `LongRunning` worker threads.
    #[arg(long, default_value_t = 2)]
    long_running_workers: usize,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    taskforge::logging::init_logging(args.log_level.map(Into::into));

    let scheduler_config = SchedulerConfig {
        long_running_workers: args.long_running_workers.max(1),
        ..SchedulerConfig::default()
    };
    let manager = TaskManager::new(scheduler_config, Default::default())?;

    run_chain_demo(&manager).await;
    run_process_demo(&manager, &args).await?;

    manager.stop().await;
    Ok(())
}

/// A two-stage chain: a Concurrent step produces a value, an Exclusive step
/// consumes it, and a Finally step always runs to report the outcome.
async fn run_chain_demo(manager: &Arc<TaskManager>) {
    use taskforge::task::builder::{ActionTask, FuncTask};

    let produce = FuncTask::new(
        "produce-greeting",
        Affinity::Concurrent,
        manager.child_token(),
        manager.progress_reporter(),
        |ctx| async move {
            ctx.progress.update(0, 1, "computing greeting");
            Ok("hello from taskforge".to_string())
        },
    );

    let consume = produce.then_map::<()>(
        "print-greeting",
        Affinity::Exclusive,
        Predicate::OnSuccess,
        manager.child_token(),
        manager.progress_reporter(),
        |_ctx, greeting| {
            Box::pin(async move {
                info!(%greeting, "chain step produced a value");
                Ok(taskforge::task::TaskOutput::None)
            })
        },
    );

    let report = ActionTask::new(
        "report",
        Affinity::Concurrent,
        manager.child_token(),
        manager.progress_reporter(),
        |_ctx| async move {
            info!("chain demo finished");
            Ok(())
        },
    );
    let report = consume.finally(report);

    manager
        .schedule(produce)
        .expect("manager accepts work before stop() is called");
    report.join().await;
}

/// Spawn `--program` as a `ProcessTask` and report its captured output.
async fn run_process_demo(manager: &Arc<TaskManager>, args: &CliArgs) -> anyhow::Result<()> {
    let process: ProcessTask<String> = ProcessTask::configure(
        "demo-process",
        Affinity::LongRunning,
        manager.child_token(),
        manager.progress_reporter(),
        ProcessStartSpec::new(args.program.clone()).arg(args.program_arg.clone()),
        ProcessEnvironment::host_default(),
        Box::new(LineOutputProcessor::new()),
    );
    process.on_end_process(|ev| {
        info!(exit_code = ?ev.exit_code, detached = ev.detached, "process ended");
    });

    manager.schedule(process.task().clone())?;
    process.task().join().await;

    match process.task().result() {
        Some(output) => info!(%output, "process demo captured output"),
        None => info!("process demo produced no single-value output"),
    }
    Ok(())
}
