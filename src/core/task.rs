//! Task body trait, task descriptors and error types.
//!
//! A `TaskBody` is the opaque computation a task performs. Compositions never
//! look inside it; they only thread its output to the next stage.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use super::types::TaskId;

/// Values that can flow through a composition.
///
/// Values are cloned when fanned out and serialized into events.
pub trait TaskValue: Clone + Serialize + Send + Sync + 'static {}

impl<T> TaskValue for T where T: Clone + Serialize + Send + Sync + 'static {}

/// Errors a task can produce instead of a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task body failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The pending suspension was cancelled before the body ran.
    #[error("task was cancelled")]
    Cancelled,
}

impl TaskError {
    /// Check if this error is a cancellation rather than a body failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// The computation performed by a task.
///
/// # Example
///
/// ```
/// use braid::{TaskBody, TaskError, TaskId};
///
/// struct Square;
///
/// impl TaskBody<i64> for Square {
///     fn name(&self) -> &str {
///         "square"
///     }
///
///     fn compute(&self, _task: TaskId, input: &i64) -> Result<i64, TaskError> {
///         Ok(input * input)
///     }
/// }
///
/// assert_eq!(Square.compute(TaskId::new(1), &4), Ok(16));
/// ```
pub trait TaskBody<T>: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Compute an output from the input.
    ///
    /// `task` identifies the task being evaluated. Bodies that are a pure
    /// function of the input ignore it.
    fn compute(&self, task: TaskId, input: &T) -> Result<T, TaskError>;
}

/// Template for a task inside a composition.
///
/// The composition supplies the input when the task is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    /// Caller-assigned id.
    pub id: TaskId,
    /// Simulated latency before the body runs.
    pub duration: Option<Duration>,
}

impl TaskSpec {
    /// Create a spec with no simulated latency.
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            duration: None,
        }
    }

    /// Builder: set the simulated latency.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Consecutive ids starting at `first_id`, all sharing one latency.
    pub fn sequence(first_id: u32, count: usize, duration: Option<Duration>) -> Vec<TaskSpec> {
        (first_id..)
            .take(count)
            .map(|id| TaskSpec {
                id: TaskId::new(id),
                duration,
            })
            .collect()
    }

    /// Bind an input, producing a descriptor ready to execute.
    pub fn describe<T>(&self, input: T) -> TaskDescriptor<T> {
        TaskDescriptor {
            id: self.id,
            input,
            duration: self.duration,
        }
    }
}

/// A single task invocation: id, input and optional latency.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDescriptor<T> {
    pub id: TaskId,
    pub input: T,
    pub duration: Option<Duration>,
}

impl<T> TaskDescriptor<T> {
    /// Create a descriptor with no simulated latency.
    pub fn new(id: impl Into<TaskId>, input: T) -> Self {
        Self {
            id: id.into(),
            input,
            duration: None,
        }
    }

    /// Builder: set the simulated latency.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Latency to wait before the body runs.
    pub fn delay(&self) -> Duration {
        self.duration.unwrap_or(Duration::ZERO)
    }
}
