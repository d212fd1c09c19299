//! Composition error types.

use thiserror::Error;

use crate::core::task::TaskError;
use crate::core::types::TaskId;

/// A task that produced an error instead of a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task {task_id} failed: {error}")]
pub struct TaskFailure {
    /// Id of the failing task.
    pub task_id: TaskId,
    /// Launch slot, for tasks inside a parallel composition.
    pub slot: Option<usize>,
    /// What went wrong.
    #[source]
    pub error: TaskError,
}

impl TaskFailure {
    pub fn new(task_id: TaskId, error: TaskError) -> Self {
        Self {
            task_id,
            slot: None,
            error,
        }
    }

    /// Builder: attach the parallel launch slot.
    pub fn in_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

/// Ways a composition can end without a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    /// A task failed; a serial chain stops here, a fail-fast fan-out reports
    /// the first failure.
    #[error(transparent)]
    TaskFailed(TaskFailure),

    /// Every parallel slot settled and at least one failed.
    #[error("{} of {total} parallel task(s) failed", .failures.len())]
    Aggregate {
        failures: Vec<TaskFailure>,
        total: usize,
    },

    /// A pending task was cancelled, so the continuation can never fire.
    #[error("composition stalled: cancelled task(s) {}", format_ids(.cancelled))]
    Stalled { cancelled: Vec<TaskId> },

    /// The driver dropped the continuation without delivering a result.
    #[error("composition abandoned before delivering a result")]
    Abandoned,
}

impl CompositionError {
    /// The failing task, when a single task is responsible.
    pub fn failed_task(&self) -> Option<TaskId> {
        match self {
            CompositionError::TaskFailed(failure) => Some(failure.task_id),
            _ => None,
        }
    }

    pub fn is_stalled(&self) -> bool {
        matches!(self, CompositionError::Stalled { .. })
    }
}

impl From<TaskFailure> for CompositionError {
    fn from(failure: TaskFailure) -> Self {
        CompositionError::TaskFailed(failure)
    }
}

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Programming errors in how a composition is driven.
///
/// These are never recoverable. Low-level state types return them so the
/// condition can be inspected; drivers call [`raise`](Self::raise).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionMisuse {
    /// A parallel slot received a second result.
    #[error("slot {slot} written twice")]
    SlotWrittenTwice { slot: usize },

    /// A result arrived for a slot the composition does not have.
    #[error("slot {slot} out of range for {len} slot(s)")]
    SlotOutOfRange { slot: usize, len: usize },

    /// The continuation was invoked after it had already fired.
    #[error("continuation fired twice")]
    ContinuationFiredTwice,

    /// A serial machine was resumed while no task was pending.
    #[error("resumed while no task was pending")]
    UnexpectedResume,

    /// A serial machine was started twice.
    #[error("composition already started")]
    AlreadyStarted,

    /// A blocking thunk returned without reporting its outcome.
    #[error("blocking thunk for task {task_id} returned before completing")]
    BlockingThunkDeferred { task_id: TaskId },
}

impl CompositionMisuse {
    /// Abort: a composition was driven incorrectly.
    ///
    /// Logged before panicking; inside a spawned task the panic itself is
    /// caught by the runtime and only the log survives.
    #[track_caller]
    pub fn raise(self) -> ! {
        tracing::error!(misuse = %self, "composition misuse");
        panic!("composition misuse: {}", self)
    }
}
