//! SPEC_FULL.md §8 scenario S2: ten `Exclusive` tasks submitted concurrently
//! never overlap in execution, unlike `Concurrent` tasks which may.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskforge::{SchedulerConfig, TaskManager, TaskState};
use taskforge_test_utils::builders::ActionTaskBuilder;
use taskforge_test_utils::with_timeout;

#[tokio::test]
async fn ten_exclusive_tasks_never_overlap() {
    let manager = TaskManager::new(SchedulerConfig::default(), Default::default()).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let overlap_seen = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..10u32 {
        let active = active.clone();
        let overlap_seen = overlap_seen.clone();
        let completed = completed.clone();
        let task = ActionTaskBuilder::new(format!("excl-{i}"))
            .exclusive()
            .build(&manager, move |_ctx| async move {
                if active.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlap_seen.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        tasks.push(task);
    }

    for task in &tasks {
        manager.schedule(task.clone()).unwrap();
    }
    for task in &tasks {
        with_timeout(task.join()).await;
    }

    assert!(
        !overlap_seen.load(Ordering::SeqCst),
        "two Exclusive tasks ran concurrently"
    );
    assert_eq!(completed.load(Ordering::SeqCst), 10);
    for task in &tasks {
        assert_eq!(task.state(), TaskState::Succeeded);
    }
}

#[tokio::test]
async fn concurrent_tasks_may_overlap_while_exclusive_excludes_them() {
    let manager = TaskManager::new(SchedulerConfig::default(), Default::default()).unwrap();
    let concurrent_active = Arc::new(AtomicUsize::new(0));
    let concurrent_overlap = Arc::new(AtomicBool::new(false));

    let mut concurrent_tasks = Vec::new();
    for i in 0..5u32 {
        let active = concurrent_active.clone();
        let overlap = concurrent_overlap.clone();
        let task = ActionTaskBuilder::new(format!("conc-{i}")).build(&manager, move |_ctx| async move {
            active.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            if active.load(Ordering::SeqCst) > 1 {
                overlap.store(true, Ordering::SeqCst);
            }
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
        concurrent_tasks.push(task);
    }

    for task in &concurrent_tasks {
        manager.schedule(task.clone()).unwrap();
    }
    for task in &concurrent_tasks {
        with_timeout(task.join()).await;
    }

    assert!(
        concurrent_overlap.load(Ordering::SeqCst),
        "Concurrent tasks are expected to run alongside one another"
    );
}
