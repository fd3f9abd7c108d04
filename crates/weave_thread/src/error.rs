use crate::task::TaskState;
use std::fmt;

/// Errors raised by the scheduler.
///
/// The first four variants indicate a violation of the scheduler's usage
/// contract (a programming error, not a runtime condition): they are raised
/// via `panic!` at the point of detection rather than returned, since there
/// is no sensible way for a caller to recover from them. [`WorkItemFailed`]
/// is the exception: it is never panicked, only attached to the failing
/// task so a host program can inspect it with [`Task::error`](crate::Task::error).
#[derive(Debug, Clone)]
pub enum TaskSchedulerError {
    /// An operation was attempted while the task was in a state that
    /// forbids it (e.g. configuring a task that has already been
    /// scheduled, or executing one that is not yet ready).
    InvalidState {
        operation: &'static str,
        state: TaskState,
    },
    /// A task was added as a dependent of the same predecessor twice.
    DuplicateDependent,
    /// A task reported ready was not present in the pool's not-ready index.
    MissingFromNotReady,
    /// The thread pool was dropped while tasks were still scheduled.
    ShutdownWithPending,
    /// A work item panicked during execution.
    WorkItemFailed(String),
}

impl fmt::Display for TaskSchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { operation, state } => {
                write!(f, "invalid state for {operation}: task is in state {state:?}")
            }
            Self::DuplicateDependent => {
                write!(f, "task is already registered as a dependent of this task")
            }
            Self::MissingFromNotReady => {
                write!(f, "task not found in the not-ready index during notification")
            }
            Self::ShutdownWithPending => {
                write!(f, "thread pool dropped with tasks still scheduled")
            }
            Self::WorkItemFailed(message) => write!(f, "work item failed: {message}"),
        }
    }
}

impl std::error::Error for TaskSchedulerError {}
