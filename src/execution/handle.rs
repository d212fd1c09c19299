//! Handles for callback-driven compositions.
//!
//! A callback driver returns a [`CompositionHandle`] straight away. The handle
//! cancels the run and reports whether it finished or stalled; a stalled run
//! never invokes its continuation.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::types::TaskId;

use super::error::{CompositionError, CompositionMisuse};

/// Observable state of a composition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Tasks are still pending.
    Running,
    /// The continuation has fired.
    Finished,
    /// A task was cancelled; the continuation will never fire.
    Stalled { cancelled: Vec<TaskId> },
}

/// Control and status for one callback-driven composition run.
#[derive(Debug, Clone)]
pub struct CompositionHandle {
    cancel: CancellationToken,
    state: Arc<Mutex<RunState>>,
}

impl CompositionHandle {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            state: Arc::new(Mutex::new(RunState::Running)),
        }
    }

    /// Cancel every pending task of this run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> RunState {
        self.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.lock() == RunState::Finished
    }

    pub fn is_stalled(&self) -> bool {
        matches!(*self.lock(), RunState::Stalled { .. })
    }

    /// Error describing the stall, if the run stalled.
    pub fn stall_error(&self) -> Option<CompositionError> {
        match &*self.lock() {
            RunState::Stalled { cancelled } => Some(CompositionError::Stalled {
                cancelled: cancelled.clone(),
            }),
            _ => None,
        }
    }

    pub(crate) fn mark_finished(&self) {
        *self.lock() = RunState::Finished;
    }

    pub(crate) fn mark_stalled(&self, cancelled: Vec<TaskId>) {
        *self.lock() = RunState::Stalled { cancelled };
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type ContinuationFn<T> = Box<dyn FnOnce(Result<T, CompositionError>) + Send + 'static>;

/// The final continuation of a composition; fires at most once.
pub struct Continuation<T> {
    inner: Option<ContinuationFn<T>>,
}

impl<T> Continuation<T> {
    pub fn new<F>(continuation: F) -> Self
    where
        F: FnOnce(Result<T, CompositionError>) + Send + 'static,
    {
        Self {
            inner: Some(Box::new(continuation)),
        }
    }

    /// Deliver the result.
    ///
    /// A second call is a misuse and leaves the continuation untouched.
    pub fn fire(&mut self, result: Result<T, CompositionError>) -> Result<(), CompositionMisuse> {
        let continuation = self
            .inner
            .take()
            .ok_or(CompositionMisuse::ContinuationFiredTwice)?;
        continuation(result);
        Ok(())
    }

    pub fn has_fired(&self) -> bool {
        self.inner.is_none()
    }

    /// Take the continuation out so it can run outside a lock.
    ///
    /// The returned value is the only copy; `self` counts as fired.
    pub(crate) fn take(&mut self) -> Result<Continuation<T>, CompositionMisuse> {
        let inner = self
            .inner
            .take()
            .ok_or(CompositionMisuse::ContinuationFiredTwice)?;
        Ok(Continuation { inner: Some(inner) })
    }
}

/// Wait for a callback driver's continuation, delivered over `receiver`.
///
/// A stalled run drops its continuation without firing it, which closes the
/// channel; that is reported as the stall.
pub(crate) async fn await_continuation<T>(
    receiver: oneshot::Receiver<Result<T, CompositionError>>,
    handle: &CompositionHandle,
) -> Result<T, CompositionError> {
    match receiver.await {
        Ok(result) => result,
        Err(_) => Err(handle
            .stall_error()
            .unwrap_or(CompositionError::Abandoned)),
    }
}

/// Run a blocking driver on the blocking pool.
///
/// Panics inside the driver, including composition misuse, are re-raised.
pub(crate) async fn join_blocking<R, F>(driver: F) -> Result<R, CompositionError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    match tokio::task::spawn_blocking(driver).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(CompositionError::Abandoned),
    }
}
