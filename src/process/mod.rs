//! ProcessTask runtime (C5): wraps an OS process as a first-class task.

pub mod environment;
pub mod output;
pub mod runtime;
mod spec;

pub use environment::ProcessEnvironment;
pub use output::{ListOutputProcessor, LineOutputProcessor, OutputProcessor, PROCESS_RUNNING_SENTINEL};
pub use runtime::{
    ProcessEndedEvent, ProcessErrorDataEvent, ProcessOutputEvent, ProcessStartedEvent, ProcessTask,
};
pub use spec::ProcessStartSpec;

pub(crate) use runtime::ProcessRuntime;
