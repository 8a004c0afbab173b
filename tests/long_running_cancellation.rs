//! SPEC_FULL.md §8 scenario S3: a `LongRunning` task spinning on its
//! cancellation token is actually canceled by `manager.stop()` within the
//! scenario's budget, and the task lands in the `Canceled` state rather than
//! `Faulted`.
//!
//! LongRunning workers are dedicated OS threads that `Handle::block_on` their
//! job, so these tests need a genuine multi-thread Tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskforge::{SchedulerConfig, TaskError, TaskManager, TaskState};
use taskforge_test_utils::builders::ActionTaskBuilder;
use taskforge_test_utils::with_timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn stop_cancels_a_spinning_long_running_task() {
    let manager = TaskManager::new(SchedulerConfig::default(), Default::default()).unwrap();
    let observed_cancellation = Arc::new(AtomicBool::new(false));
    let observed2 = observed_cancellation.clone();

    let task = ActionTaskBuilder::new("spin")
        .long_running()
        .build(&manager, move |ctx| async move {
            while !ctx.cancel_token.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            observed2.store(true, Ordering::SeqCst);
            Err(TaskError::Cancellation)
        });

    manager.schedule(task.clone()).unwrap();
    // Let the worker actually start spinning before we stop the manager.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = Instant::now();
    with_timeout(manager.stop()).await;
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "stop() must return promptly even though the task is still draining"
    );

    with_timeout(task.join()).await;

    assert!(observed_cancellation.load(Ordering::SeqCst));
    assert_eq!(task.state(), TaskState::Canceled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn scheduling_after_stop_fails_with_shutdown_error() {
    let manager = TaskManager::new(SchedulerConfig::default(), Default::default()).unwrap();
    with_timeout(manager.stop()).await;

    let task = ActionTaskBuilder::new("too-late").build(&manager, |_ctx| async { Ok(()) });
    let err = manager.schedule(task).unwrap_err();
    assert!(matches!(err, TaskError::Shutdown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn a_task_already_canceled_before_it_starts_transitions_canceled_without_running() {
    let manager = TaskManager::new(SchedulerConfig::default(), Default::default()).unwrap();
    manager.token().cancel();

    let ran = Arc::new(AtomicBool::new(false));
    let ran2 = ran.clone();
    let task = ActionTaskBuilder::new("preempted")
        .long_running()
        .build(&manager, move |_ctx| async move {
            ran2.store(true, Ordering::SeqCst);
            Ok(())
        });

    manager.schedule(task.clone()).unwrap();
    with_timeout(task.join()).await;

    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(task.state(), TaskState::Canceled);
}
