//! TaskQueue (C6): a serializing driver for a homogeneous sequence of child
//! items with per-item result projection, run on the Concurrent lane.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::affinity::Affinity;
use crate::error::TaskError;
use crate::task::{BodyFuture, RunContext, Task, TaskBody, TaskCore, TaskOutput};

type ItemFuture = Pin<Box<dyn Future<Output = Result<TaskOutput, TaskError>> + Send>>;
type ItemFn = Box<dyn FnOnce() -> ItemFuture + Send>;

/// Body-internal representation: each item has already been erased down to
/// a thunk producing a `TaskOutput`.
pub(crate) struct QueueBody {
    items: Vec<ItemFn>,
    fail_fast: bool,
}

impl QueueBody {
    pub(crate) fn run(self, ctx: RunContext) -> BodyFuture {
        Box::pin(run_queue(self, ctx))
    }
}

async fn run_queue(body: QueueBody, ctx: RunContext) -> Result<TaskOutput, TaskError> {
    if !ctx.success_from_parent {
        return Err(TaskError::Dependency);
    }

    let total = body.items.len() as u64;
    let mut aggregate: Vec<Arc<dyn Any + Send + Sync>> = Vec::with_capacity(body.items.len());

    for (idx, item) in body.items.into_iter().enumerate() {
        if ctx.cancel_token.is_cancelled() {
            return Err(TaskError::Cancellation);
        }
        ctx.progress.update(idx as u64, total, format!("item {idx}"));

        match item().await {
            Ok(TaskOutput::Single(value)) => aggregate.push(value),
            Ok(TaskOutput::Aggregate(values)) => aggregate.extend(values),
            Ok(TaskOutput::None) => {}
            Err(err) => {
                if body.fail_fast {
                    return Err(err);
                }
                // Always-edge semantics: the queue continues past a
                // sub-task fault; the item simply contributes nothing to
                // the aggregate.
            }
        }
    }

    ctx.progress.update(total, total, "done");
    Ok(TaskOutput::Aggregate(aggregate))
}

/// Builds a `Task<TOut>` whose body drains `items` sequentially, projecting
/// each through `project` to produce a `List<TOut>` aggregate.
pub struct TaskQueueBuilder<TIn, TOut> {
    items: Vec<TIn>,
    project: Option<Arc<dyn Fn(TIn) -> Pin<Box<dyn Future<Output = Result<TOut, TaskError>> + Send>> + Send + Sync>>,
    fail_fast: bool,
}

impl<TIn, TOut> TaskQueueBuilder<TIn, TOut>
where
    TIn: Send + 'static,
    TOut: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            project: None,
            fail_fast: false,
        }
    }

    pub fn items(mut self, items: impl IntoIterator<Item = TIn>) -> Self {
        self.items.extend(items);
        self
    }

    pub fn project<F, Fut>(mut self, project: F) -> Self
    where
        F: Fn(TIn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TOut, TaskError>> + Send + 'static,
    {
        self.project = Some(Arc::new(move |item| Box::pin(project(item)) as ItemFuture));
        self
    }

    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    pub fn build(
        self,
        name: impl Into<String>,
        cancel_token: tokio_util::sync::CancellationToken,
        progress_reporter: Arc<crate::progress::ProgressReporter>,
    ) -> Task<TOut> {
        let project = self.project.expect("TaskQueueBuilder::project must be set before build");
        let item_fns: Vec<ItemFn> = self
            .items
            .into_iter()
            .map(|item| {
                let project = project.clone();
                Box::new(move || {
                    let fut = project(item);
                    Box::pin(async move {
                        let value = fut.await?;
                        Ok(TaskOutput::Single(Arc::new(value) as Arc<dyn Any + Send + Sync>))
                    }) as ItemFuture
                }) as ItemFn
            })
            .collect();

        let body = QueueBody {
            items: item_fns,
            fail_fast: self.fail_fast,
        };
        let core = TaskCore::new(
            name,
            Affinity::Concurrent,
            cancel_token,
            progress_reporter,
            TaskBody::Queue(body),
        );
        Task::from_core(core)
    }
}

impl<TIn, TOut> Default for TaskQueueBuilder<TIn, TOut>
where
    TIn: Send + 'static,
    TOut: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
