//! The task unit: one task body wired to an event sink.
//!
//! A `TaskUnit` runs a single task in one of several suspension styles:
//! - blocking: the calling thread waits out the latency
//! - future: the latency is a timer, the caller awaits
//! - callback: the caller is released at once and told about the outcome later
//! - thunk: the pending step is packaged as a value to be started later
//!
//! Every style emits the same events: a request before the body runs, then a
//! response, error or cancellation.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::task::{TaskBody, TaskDescriptor, TaskError, TaskValue};
use crate::core::types::TaskId;
use crate::events::{Event, EventBus};

use super::error::TaskFailure;

/// Completion callback for a single task.
pub type Callback<T> = Box<dyn FnOnce(Result<T, TaskFailure>) + Send + 'static>;

/// Which thunk flavour a coroutine driver builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThunkKind {
    /// The thunk runs the task on the invoking thread and calls back before returning.
    Blocking,
    /// The thunk schedules the task on the runtime and calls back on completion.
    Suspending,
}

/// A pending task step, packaged as a zero-argument resumable unit.
///
/// Nothing happens until [`invoke`](Self::invoke) is called with the
/// callback that should receive the outcome.
pub struct Thunk<T> {
    task_id: TaskId,
    run: Box<dyn FnOnce(Callback<T>) + Send + 'static>,
}

impl<T> Thunk<T> {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Start the step; `callback` receives its outcome exactly once.
    pub fn invoke<F>(self, callback: F)
    where
        F: FnOnce(Result<T, TaskFailure>) + Send + 'static,
    {
        (self.run)(Box::new(callback))
    }
}

/// Runs task bodies and reports their lifecycle to an [`EventBus`].
///
/// Cloning is cheap; clones share the body, the bus and the cancellation token.
pub struct TaskUnit<T> {
    body: Arc<dyn TaskBody<T>>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
}

impl<T> Clone for TaskUnit<T> {
    fn clone(&self) -> Self {
        Self {
            body: Arc::clone(&self.body),
            events: Arc::clone(&self.events),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: TaskValue> TaskUnit<T> {
    /// Create a unit from a shared body and event bus.
    pub fn new(body: Arc<dyn TaskBody<T>>, events: Arc<EventBus>) -> Self {
        Self {
            body,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a unit that owns `body`.
    pub fn from_body<B>(body: B, events: Arc<EventBus>) -> Self
    where
        B: TaskBody<T> + 'static,
    {
        Self::new(Arc::new(body), events)
    }

    /// Builder: use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel every pending suspension of this unit and its clones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn body_name(&self) -> &str {
        self.body.name()
    }

    /// Run a task on the calling thread.
    ///
    /// The latency is a real sleep; the caller is released only once the
    /// output is available.
    pub fn execute_blocking(&self, descriptor: TaskDescriptor<T>) -> Result<T, TaskFailure> {
        self.request(&descriptor);

        if self.cancel.is_cancelled() {
            return Err(self.cancelled(descriptor.id));
        }
        if let Some(duration) = descriptor.duration {
            std::thread::sleep(duration);
        }
        // A blocking sleep cannot be interrupted; honour a cancel that landed meanwhile.
        if self.cancel.is_cancelled() {
            return Err(self.cancelled(descriptor.id));
        }

        self.evaluate(descriptor.id, &descriptor.input)
    }

    /// Run a task, suspending on a timer for its latency.
    pub async fn execute(&self, descriptor: TaskDescriptor<T>) -> Result<T, TaskFailure> {
        self.request(&descriptor);
        self.suspend(descriptor).await
    }

    /// Start a task and return immediately.
    ///
    /// The request event is emitted before this returns. The callback runs on
    /// the Tokio runtime once the latency has elapsed, or once the unit is
    /// cancelled. Must be called from within a Tokio runtime.
    pub fn execute_with_callback<F>(&self, descriptor: TaskDescriptor<T>, callback: F)
    where
        F: FnOnce(Result<T, TaskFailure>) + Send + 'static,
    {
        self.request(&descriptor);
        let unit = self.clone();
        tokio::spawn(async move {
            let outcome = unit.suspend(descriptor).await;
            callback(outcome);
        });
    }

    /// Package a task as a thunk of the given kind.
    pub fn thunk(&self, kind: ThunkKind, descriptor: TaskDescriptor<T>) -> Thunk<T> {
        let unit = self.clone();
        let task_id = descriptor.id;
        let run: Box<dyn FnOnce(Callback<T>) + Send> = match kind {
            ThunkKind::Blocking => {
                Box::new(move |callback: Callback<T>| callback(unit.execute_blocking(descriptor)))
            }
            ThunkKind::Suspending => Box::new(move |callback: Callback<T>| {
                unit.execute_with_callback(descriptor, callback)
            }),
        };
        Thunk { task_id, run }
    }

    async fn suspend(&self, descriptor: TaskDescriptor<T>) -> Result<T, TaskFailure> {
        let delay = descriptor.delay();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled(descriptor.id)),
            _ = tokio::time::sleep(delay) => self.evaluate(descriptor.id, &descriptor.input),
        }
    }

    fn request(&self, descriptor: &TaskDescriptor<T>) {
        debug!(task = %descriptor.id, body = self.body.name(), "task requested");
        self.events
            .emit(Event::task_requested(descriptor.id, &descriptor.input));
    }

    fn evaluate(&self, task_id: TaskId, input: &T) -> Result<T, TaskFailure> {
        match self.body.compute(task_id, input) {
            Ok(output) => {
                self.events.emit(Event::task_responded(task_id, &output));
                Ok(output)
            }
            Err(error) => {
                self.events.emit(Event::task_failed(task_id, error.to_string()));
                Err(TaskFailure::new(task_id, error))
            }
        }
    }

    fn cancelled(&self, task_id: TaskId) -> TaskFailure {
        debug!(task = %task_id, "task cancelled");
        self.events.emit(Event::task_cancelled(task_id));
        TaskFailure::new(task_id, TaskError::Cancelled)
    }
}
