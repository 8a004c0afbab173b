//! The chain operator (C3): parent -> child edges with predicates, and the
//! pure dispatch core that decides which children run once a parent reaches
//! a terminal state.

use std::sync::Arc;

use crate::task::{TaskCore, TaskState};

/// The edge label deciding whether a child runs given the parent's terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Always,
    OnSuccess,
    OnFailure,
}

/// A child task attached via the chain operator, with its edge label.
#[derive(Clone)]
pub(crate) struct Continuation {
    pub child: Arc<TaskCore>,
    pub predicate: Predicate,
}

/// What the caller should do with a continuation once the parent's terminal
/// state is known.
pub(crate) enum ChainCommand {
    /// The predicate matched: schedule `child` with `success_from_parent`.
    Schedule {
        child: Arc<TaskCore>,
        success_from_parent: bool,
    },
    /// The predicate did not match: `child` transitions
    /// Canceled-as-dependency-failed, and its own continuations must be
    /// visited with the same rule (the caller recurses).
    CancelAsDependencyFailed { child: Arc<TaskCore> },
}

/// Pure, synchronous dispatch decision for one parent's terminal state
/// against its continuation list (§4.2). Predicate matching is purely local
/// to the immediate parent (§9's resolution of S1): this function only ever
/// looks at `parent_state`, never at a grandparent's outcome.
///
/// No lock is held and nothing is awaited inside this function — it is the
/// pure core the scheduler's completion handler (an IO shell) drives,
/// generalizing the teacher's pure-core/IO-shell split to a dynamically
/// built chain.
pub(crate) fn dispatch_children(
    parent_state: TaskState,
    continuations: &[Continuation],
) -> Vec<ChainCommand> {
    debug_assert!(parent_state.is_terminal());
    let parent_succeeded = parent_state == TaskState::Succeeded;

    continuations
        .iter()
        .map(|edge| {
            let matches = match edge.predicate {
                Predicate::Always => true,
                Predicate::OnSuccess => parent_succeeded,
                // OnFailure matches Faulted or Canceled-as-dep-failed, i.e.
                // anything that isn't a clean Succeeded.
                Predicate::OnFailure => !parent_succeeded,
            };
            if matches {
                ChainCommand::Schedule {
                    child: edge.child.clone(),
                    success_from_parent: parent_succeeded,
                }
            } else {
                ChainCommand::CancelAsDependencyFailed {
                    child: edge.child.clone(),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::Affinity;
    use crate::error::TaskError;
    use crate::task::{TaskBody, TaskOutput};
    use tokio_util::sync::CancellationToken;

    fn leaf(name: &str) -> Arc<TaskCore> {
        let body: crate::task::BodyFn =
            Box::new(|_ctx| Box::pin(async { Ok(TaskOutput::None) }));
        TaskCore::new(
            name,
            Affinity::Concurrent,
            CancellationToken::new(),
            Arc::new(crate::progress::ProgressReporter::default()),
            TaskBody::Action(body),
        )
    }

    #[test]
    fn on_success_matches_succeeded_parent() {
        let child = leaf("child");
        let edges = vec![Continuation {
            child: child.clone(),
            predicate: Predicate::OnSuccess,
        }];
        let commands = dispatch_children(TaskState::Succeeded, &edges);
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], ChainCommand::Schedule { .. }));
    }

    #[test]
    fn on_success_cancels_under_failure() {
        let child = leaf("child");
        let edges = vec![Continuation {
            child: child.clone(),
            predicate: Predicate::OnSuccess,
        }];
        let commands = dispatch_children(TaskState::Faulted, &edges);
        assert!(matches!(
            commands[0],
            ChainCommand::CancelAsDependencyFailed { .. }
        ));
    }

    #[test]
    fn on_failure_matches_canceled_parent() {
        let child = leaf("child");
        let edges = vec![Continuation {
            child: child.clone(),
            predicate: Predicate::OnFailure,
        }];
        let commands = dispatch_children(TaskState::Canceled, &edges);
        assert!(matches!(commands[0], ChainCommand::Schedule { .. }));
    }

    #[test]
    fn always_matches_every_terminal_state() {
        for state in [TaskState::Succeeded, TaskState::Faulted, TaskState::Canceled] {
            let child = leaf("child");
            let edges = vec![Continuation {
                child,
                predicate: Predicate::Always,
            }];
            let commands = dispatch_children(state, &edges);
            assert!(matches!(commands[0], ChainCommand::Schedule { .. }));
        }
    }

    #[test]
    fn unused_error_variant_is_constructible() {
        // Smoke test that the taxonomy compiles end to end from this module.
        let _ = TaskError::Dependency;
    }

    fn arb_state() -> impl proptest::strategy::Strategy<Value = TaskState> {
        proptest::prop_oneof![
            proptest::strategy::Just(TaskState::Succeeded),
            proptest::strategy::Just(TaskState::Faulted),
            proptest::strategy::Just(TaskState::Canceled),
        ]
    }

    fn arb_predicate() -> impl proptest::strategy::Strategy<Value = Predicate> {
        proptest::prop_oneof![
            proptest::strategy::Just(Predicate::Always),
            proptest::strategy::Just(Predicate::OnSuccess),
            proptest::strategy::Just(Predicate::OnFailure),
        ]
    }

    proptest::proptest! {
        // §8 invariant 2: for any chain and any predicate, exactly one of
        // "child ran" (Schedule) or "child Canceled-as-dep-failed" holds.
        #[test]
        fn exactly_one_outcome_per_edge(
            parent_state in arb_state(),
            predicates in proptest::collection::vec(arb_predicate(), 0..8),
        ) {
            let edges: Vec<Continuation> = predicates
                .iter()
                .map(|&predicate| Continuation { child: leaf("child"), predicate })
                .collect();
            let commands = dispatch_children(parent_state, &edges);
            proptest::prop_assert_eq!(commands.len(), edges.len());

            for (command, edge) in commands.iter().zip(&edges) {
                let scheduled = matches!(command, ChainCommand::Schedule { .. });
                let canceled = matches!(command, ChainCommand::CancelAsDependencyFailed { .. });
                // Exactly one of the two holds, never both, never neither.
                proptest::prop_assert!(scheduled ^ canceled);

                let expect_schedule = match edge.predicate {
                    Predicate::Always => true,
                    Predicate::OnSuccess => parent_state == TaskState::Succeeded,
                    Predicate::OnFailure => parent_state != TaskState::Succeeded,
                };
                proptest::prop_assert_eq!(scheduled, expect_schedule);

                if let ChainCommand::Schedule { success_from_parent, .. } = command {
                    // §3: Schedule always carries the parent's actual
                    // success/failure, regardless of which predicate matched.
                    proptest::prop_assert_eq!(*success_from_parent, parent_state == TaskState::Succeeded);
                }
            }
        }

        // Predicate matching is purely local to the immediate parent: the
        // decision for a batch of sibling edges never depends on anything
        // but `parent_state` and each edge's own predicate, so running the
        // same inputs twice is idempotent (no hidden ordering/state).
        #[test]
        fn dispatch_is_deterministic_given_the_same_inputs(
            parent_state in arb_state(),
            predicates in proptest::collection::vec(arb_predicate(), 0..8),
        ) {
            let edges: Vec<Continuation> = predicates
                .iter()
                .map(|&predicate| Continuation { child: leaf("child"), predicate })
                .collect();
            let first = dispatch_children(parent_state, &edges);
            let second = dispatch_children(parent_state, &edges);

            let as_bools = |cmds: &[ChainCommand]| -> Vec<bool> {
                cmds.iter().map(|c| matches!(c, ChainCommand::Schedule { .. })).collect()
            };
            proptest::prop_assert_eq!(as_bools(&first), as_bools(&second));
        }
    }
}
