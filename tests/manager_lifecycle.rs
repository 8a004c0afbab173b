//! SPEC_FULL.md §4.4 invariants: a `Ui`-affinity task requires
//! `TaskManager::initialize` to have been called, runs on the recorded UI
//! thread via the injected `UiSurface`, and a second `initialize` call is
//! rejected.

use std::sync::Arc;

use taskforge::{Affinity, SchedulerConfig, TaskError, TaskManager, TaskState};
use taskforge_test_utils::builders::ActionTaskBuilder;
use taskforge_test_utils::fake_ui::FakeUiSurface;
use taskforge_test_utils::with_timeout;

fn manager() -> Arc<TaskManager> {
    TaskManager::new(SchedulerConfig::default(), Default::default()).unwrap()
}

// Not a `#[tokio::test]`: `FakeUiSurface::post` runs its runnable inline via
// `Handle::block_on`, and calling that from *within* an already-running
// async task (as a `#[tokio::test]` body is) would be a reentrant `block_on`
// and panic. A real host's UI surface hands the runnable off to its own
// native event loop thread instead (see `scheduler.rs`'s `LongRunningPool`
// for the same "enter, then block_on, from a thread that's merely entered
// the runtime" pattern) - this test reproduces that shape: `initialize` and
// `schedule` are called from the plain thread that only *entered* the
// runtime, never from inside one of its own task polls.
#[test]
fn ui_task_runs_on_the_recorded_ui_thread_via_the_surface() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let _guard = rt.enter();

    let manager = manager();
    let ui = Arc::new(FakeUiSurface::new());
    manager.initialize(ui.clone()).unwrap();
    assert!(manager.in_ui_thread());

    let task = ActionTaskBuilder::new("ui-work")
        .ui()
        .build(&manager, |_ctx| async { Ok(()) });

    manager.schedule(task.clone()).unwrap();
    rt.block_on(with_timeout(task.join()));

    assert_eq!(task.state(), TaskState::Succeeded);
    assert_eq!(ui.invocation_count(), 1);
    assert!(ui.all_invocations_on_current_thread());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ui_task_before_initialize_fails_with_state_error() {
    let manager = manager();
    let task = ActionTaskBuilder::new("too-early")
        .ui()
        .build(&manager, |_ctx| async { Ok(()) });

    let err = manager.schedule(task).unwrap_err();
    assert!(matches!(err, TaskError::State(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initialize_twice_is_rejected() {
    let manager = manager();
    let ui = Arc::new(FakeUiSurface::new());
    manager.initialize(ui.clone()).unwrap();

    let err = manager.initialize(ui).unwrap_err();
    assert!(matches!(err, TaskError::State(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_long_running_workers_is_rejected_up_front() {
    let mut config = SchedulerConfig::default();
    config.long_running_workers = 0;
    let err = TaskManager::new(config, Default::default()).unwrap_err();
    assert!(matches!(err, TaskError::State(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_chain_of_typed_tasks_flows_output_to_the_next_stage() {
    use taskforge::Predicate;
    use taskforge_test_utils::builders::FuncTaskBuilder;

    let manager = manager();
    let produce = FuncTaskBuilder::new("produce")
        .build::<u32, _, _>(&manager, |_ctx| async { Ok(41u32) });

    let consume_token = manager.child_token();
    let reporter = manager.progress_reporter();
    let consume = produce.then_map::<u32>(
        "consume",
        Affinity::Concurrent,
        Predicate::OnSuccess,
        consume_token,
        reporter,
        |_ctx, value| {
            Box::pin(async move {
                Ok(taskforge::task::TaskOutput::Single(std::sync::Arc::new(
                    *value + 1,
                ) as std::sync::Arc<dyn std::any::Any + Send + Sync>))
            })
        },
    );

    manager.schedule(produce.clone()).unwrap();
    with_timeout(consume.join()).await;

    assert_eq!(consume.state(), TaskState::Succeeded);
    assert_eq!(consume.result().map(|v| *v), Some(42));
}
