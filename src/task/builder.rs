//! Builders for the two plain task bodies: `ActionTask` (no result value)
//! and `FuncTask<T>` (a single typed result).

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::affinity::Affinity;
use crate::error::TaskError;
use crate::progress::ProgressReporter;

use super::{BodyFn, RunContext, Task, TaskBody, TaskCore, TaskOutput};

/// Builds a `Task<()>` — the "action" result type: no value.
pub struct ActionTask;

impl ActionTask {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        affinity: Affinity,
        cancel_token: CancellationToken,
        progress_reporter: Arc<ProgressReporter>,
        body: F,
    ) -> Task<()>
    where
        F: FnOnce(RunContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let body_fn: BodyFn = Box::new(move |ctx| Box::pin(async move { body(ctx).await.map(|()| TaskOutput::None) }));
        let core = TaskCore::new(
            name,
            affinity,
            cancel_token,
            progress_reporter,
            TaskBody::Action(body_fn),
        );
        Task::from_core(core)
    }
}

/// Builds a `Task<T>` producing a single typed value `T`.
pub struct FuncTask;

impl FuncTask {
    pub fn new<T, F, Fut>(
        name: impl Into<String>,
        affinity: Affinity,
        cancel_token: CancellationToken,
        progress_reporter: Arc<ProgressReporter>,
        body: F,
    ) -> Task<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(RunContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let body_fn: BodyFn = Box::new(move |ctx| {
            Box::pin(async move {
                let value = body(ctx).await?;
                Ok(TaskOutput::Single(Arc::new(value) as Arc<dyn Any + Send + Sync>))
            })
        });
        let core = TaskCore::new(
            name,
            affinity,
            cancel_token,
            progress_reporter,
            TaskBody::Func(body_fn),
        );
        Task::from_core(core)
    }
}
