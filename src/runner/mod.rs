//! Subprocess execution of external tool tasks.
//!
//! The runner spawns one external CLI process per task, streams its output
//! into an observable registry and reduces every outcome, including
//! timeouts, cancellations and faults, to a [`StageResult`].

mod changes;
mod process;
mod registry;
mod task;

pub use changes::modified_since;
pub use process::ProcessRunner;
pub use registry::{OutputLine, OutputStream, TaskRegistry, TaskSnapshot};
pub use task::{FailureKind, StageResult, TaskRecord, TaskStatus};

/// Errors internal to the runner. These never cross the task boundary;
/// [`ProcessRunner::execute`] folds them into the returned result.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("task id already registered: {0}")]
    DuplicateTask(String),

    #[error("process wait failed: {0}")]
    Io(#[from] std::io::Error),
}
