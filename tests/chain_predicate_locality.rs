//! Covers the chain operator's predicate-locality invariant (SPEC_FULL.md
//! §8, scenario S1) plus the surrounding state-machine guarantees: a chain's
//! OnFailure/OnSuccess edges consult only their own immediate parent, never a
//! grandparent's outcome, and `OnEnd` fires exactly once per task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use taskforge::{Predicate, SchedulerConfig, TaskManager, TaskState};
use taskforge_test_utils::builders::ActionTaskBuilder;
use taskforge_test_utils::with_timeout;

fn manager() -> Arc<TaskManager> {
    TaskManager::new(SchedulerConfig::default(), Default::default())
        .expect("manager construction with a healthy scheduler config must succeed")
}

#[tokio::test]
async fn on_failure_then_on_success_runs_locally() {
    // a faults; b (OnFailure) runs and appends 'b'; c (OnSuccess, attached to
    // b) runs because b itself succeeded, regardless of a's fault.
    let manager = manager();
    let log = Arc::new(Mutex::new(String::new()));

    let a = ActionTaskBuilder::new("a").build(&manager, |_ctx| async {
        Err(taskforge::error::TaskError::task_body(anyhow::anyhow!(
            "a always fails"
        )))
    });

    let log_b = log.clone();
    let b = ActionTaskBuilder::new("b").build(&manager, move |_ctx| async move {
        log_b.lock().unwrap().push('b');
        Ok(())
    });

    let log_c = log.clone();
    let c = ActionTaskBuilder::new("c").build(&manager, move |_ctx| async move {
        log_c.lock().unwrap().push('c');
        Ok(())
    });

    let b = a.then(b, Predicate::OnFailure);
    let c = b.then(c, Predicate::OnSuccess);

    manager.schedule(a.clone()).unwrap();
    with_timeout(c.join()).await;

    assert_eq!(a.state(), TaskState::Faulted);
    assert_eq!(b.state(), TaskState::Succeeded);
    assert_eq!(c.state(), TaskState::Succeeded);
    assert_eq!(&*log.lock().unwrap(), "bc");
}

#[tokio::test]
async fn on_success_after_on_failure_cancels_as_dependency_failed() {
    // a succeeds; b (OnFailure) never runs, cancels as dependency-failed; c
    // (OnSuccess, attached to b) inherits b's non-success terminal state and
    // also cancels, even though it never saw a directly.
    let manager = manager();
    let ran = Arc::new(AtomicUsize::new(0));

    let a = ActionTaskBuilder::new("a").build(&manager, |_ctx| async { Ok(()) });

    let ran_b = ran.clone();
    let b = ActionTaskBuilder::new("b").build(&manager, move |_ctx| async move {
        ran_b.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let ran_c = ran.clone();
    let c = ActionTaskBuilder::new("c").build(&manager, move |_ctx| async move {
        ran_c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let b = a.then(b, Predicate::OnFailure);
    let c = b.then(c, Predicate::OnSuccess);

    manager.schedule(a.clone()).unwrap();
    with_timeout(c.join()).await;

    assert_eq!(a.state(), TaskState::Succeeded);
    assert_eq!(b.state(), TaskState::Canceled);
    assert_eq!(c.state(), TaskState::Canceled);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn always_edge_runs_after_either_outcome() {
    let manager = manager();

    for should_fail in [false, true] {
        let manager = manager.clone();
        let parent = ActionTaskBuilder::new("parent").build(&manager, move |_ctx| async move {
            if should_fail {
                Err(taskforge::error::TaskError::task_body(anyhow::anyhow!(
                    "boom"
                )))
            } else {
                Ok(())
            }
        });
        let cleanup = ActionTaskBuilder::new("cleanup").build(&manager, |_ctx| async { Ok(()) });
        let cleanup = parent.finally(cleanup);

        manager.schedule(parent.clone()).unwrap();
        with_timeout(cleanup.join()).await;

        assert_eq!(cleanup.state(), TaskState::Succeeded);
    }
}

#[tokio::test]
async fn on_end_fires_exactly_once() {
    let manager = manager();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired2 = fired.clone();

    let task = ActionTaskBuilder::new("once").build(&manager, |_ctx| async { Ok(()) });
    task.on_end(move |_ev| {
        fired2.fetch_add(1, Ordering::SeqCst);
    });

    manager.schedule(task.clone()).unwrap();
    with_timeout(task.join()).await;
    // give any (incorrect) double-fire a chance to land before asserting
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scheduling_an_already_started_chain_head_is_idempotent() {
    let manager = manager();
    let runs = Arc::new(AtomicUsize::new(0));
    let runs2 = runs.clone();

    let task = ActionTaskBuilder::new("idempotent").build(&manager, move |_ctx| async move {
        runs2.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    manager.schedule(task.clone()).unwrap();
    with_timeout(task.join()).await;
    // Scheduling the same (now-terminal) head again must not re-run the body.
    manager.schedule(task.clone()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(task.state(), TaskState::Succeeded);
}

#[tokio::test]
async fn fault_handler_suppresses_downstream_on_failure_edge() {
    let manager = manager();
    let log = Arc::new(Mutex::new(String::new()));

    let a = ActionTaskBuilder::new("a").build(&manager, |_ctx| async {
        Err(taskforge::error::TaskError::task_body(anyhow::anyhow!(
            "recoverable"
        )))
    });
    a.catch(|_err| true);

    let log_on_success = log.clone();
    let on_success = ActionTaskBuilder::new("on-success").build(&manager, move |_ctx| async move {
        log_on_success.lock().unwrap().push('s');
        Ok(())
    });
    let log_on_failure = log.clone();
    let on_failure = ActionTaskBuilder::new("on-failure").build(&manager, move |_ctx| async move {
        log_on_failure.lock().unwrap().push('f');
        Ok(())
    });

    let on_success = a.then(on_success, Predicate::OnSuccess);
    let on_failure = a.then(on_failure, Predicate::OnFailure);

    manager.schedule(a.clone()).unwrap();
    with_timeout(on_success.join()).await;
    with_timeout(on_failure.join()).await;

    // A claimed fault succeeds its own task (so downstream OnSuccess edges
    // fire instead of OnFailure ones) rather than leaving `a` Faulted.
    assert_eq!(a.state(), TaskState::Succeeded);
    assert_eq!(on_success.state(), TaskState::Succeeded);
    assert_eq!(on_failure.state(), TaskState::Canceled);
    assert_eq!(&*log.lock().unwrap(), "s");
}
