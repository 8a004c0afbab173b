//! `OutputProcessor` — a stateful line consumer used by `ProcessTask`.

use std::any::Any;
use std::sync::Arc;

use crate::task::TaskOutput;

/// The sentinel the source uses for an empty, non-list string result. The
/// design note in the specification flags this as suspect (an odd choice to
/// overload "no output happened" with a phrase that reads like a live
/// status), but it is retained here rather than silently dropped, since
/// downstream consumers of the original behavior may depend on matching
/// against this exact string.
pub const PROCESS_RUNNING_SENTINEL: &str = "Process running";

/// A stateful consumer of line-oriented stdout, emitting either a single
/// value or a streamed aggregate. `on_entry` fires in input order; the
/// result is only meaningful after `end_of_stream`.
pub trait OutputProcessor: Send {
    /// Receive one line of stdout, in order.
    fn on_entry(&mut self, line: &str);

    /// The source declared end-of-stream (process exited, or was detached).
    fn end_of_stream(&mut self) {}

    /// The type-erased result to use as the task's output. Returning `None`
    /// signals "this processor produced nothing"; the `ProcessTask` runtime
    /// applies the §4.5 zero-output fallback in that case.
    fn take_result(&mut self) -> Option<TaskOutput>;
}

/// Default single-value processor: keeps the last non-empty line seen and
/// reports it as a `String` result, applying the `PROCESS_RUNNING_SENTINEL`
/// fallback when no line was ever seen.
#[derive(Default)]
pub struct LineOutputProcessor {
    last_line: Option<String>,
    saw_any_line: bool,
}

impl LineOutputProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputProcessor for LineOutputProcessor {
    fn on_entry(&mut self, line: &str) {
        self.saw_any_line = true;
        self.last_line = Some(line.to_string());
    }

    fn take_result(&mut self) -> Option<TaskOutput> {
        let value = if self.saw_any_line {
            self.last_line.clone().unwrap_or_default()
        } else {
            PROCESS_RUNNING_SENTINEL.to_string()
        };
        Some(TaskOutput::Single(
            Arc::new(value) as Arc<dyn Any + Send + Sync>
        ))
    }
}

/// Aggregate processor: every line accumulates into a `Vec<String>`. A
/// zero-byte stdout stream yields an empty aggregate (no sentinel — the
/// sentinel is defined only for the single-string case, per §8).
#[derive(Default)]
pub struct ListOutputProcessor {
    lines: Vec<String>,
}

impl ListOutputProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputProcessor for ListOutputProcessor {
    fn on_entry(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn take_result(&mut self) -> Option<TaskOutput> {
        let items = self
            .lines
            .iter()
            .cloned()
            .map(|s| Arc::new(s) as Arc<dyn Any + Send + Sync>)
            .collect();
        Some(TaskOutput::Aggregate(items))
    }
}
