//! Testing utilities for users of the braid library.
//!
//! This module provides helpers for testing compositions:
//!
//! - [`RecordingHandler`]: An event handler that keeps every event it sees
//! - [`CountingBody`]: A body wrapper that counts evaluations per task
//! - [`recording_unit`]: A task unit wired to a fresh recorder

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::task::{TaskBody, TaskError, TaskValue};
use crate::core::types::TaskId;
use crate::events::{Event, EventBus, EventHandler, Phase};
use crate::execution::TaskUnit;

/// An event handler that records events in arrival order.
///
/// # Example
///
/// ```
/// use braid::events::{Event, EventHandler, Phase};
/// use braid::testing::RecordingHandler;
/// use braid::TaskId;
///
/// let recorder = RecordingHandler::new();
/// recorder.handle(&Event::task_requested(TaskId::new(1), &0));
/// recorder.handle(&Event::task_responded(TaskId::new(1), &1));
///
/// assert_eq!(
///     recorder.phases_for(TaskId::new(1)),
///     vec![Phase::Request, Phase::Response]
/// );
/// ```
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event.
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Task lifecycle events as `(task, phase)` pairs, composition events skipped.
    pub fn task_trace(&self) -> Vec<(TaskId, Phase)> {
        self.lock()
            .iter()
            .filter_map(|event| Some((event.task_id()?, event.phase()?)))
            .collect()
    }

    /// Phases seen for one task, in order.
    pub fn phases_for(&self, task_id: TaskId) -> Vec<Phase> {
        self.task_trace()
            .into_iter()
            .filter(|(id, _)| *id == task_id)
            .map(|(_, phase)| phase)
            .collect()
    }

    /// Number of events with the given phase.
    pub fn count(&self, phase: Phase) -> usize {
        self.lock()
            .iter()
            .filter(|event| event.phase() == Some(phase))
            .count()
    }

    /// Values carried by events with the given phase.
    pub fn values(&self, phase: Phase) -> Vec<Value> {
        self.lock()
            .iter()
            .filter(|event| event.phase() == Some(phase))
            .filter_map(|event| event.value().cloned())
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, event: &Event) {
        self.lock().push(event.clone());
    }
}

/// Shared evaluation counts of a [`CountingBody`].
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<Mutex<HashMap<TaskId, u32>>>,
}

impl CallCounter {
    /// Total evaluations across all tasks.
    pub fn total(&self) -> u32 {
        self.lock().values().sum()
    }

    /// Evaluations of one task.
    pub fn calls_for(&self, task_id: TaskId) -> u32 {
        self.lock().get(&task_id).copied().unwrap_or(0)
    }

    fn record(&self, task_id: TaskId) {
        *self.lock().entry(task_id).or_insert(0) += 1;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, u32>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wraps a body and counts how often each task evaluates it.
///
/// Failing evaluations count too; cancelled tasks never reach the body.
pub struct CountingBody<B> {
    inner: B,
    counter: CallCounter,
}

impl<B> CountingBody<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            counter: CallCounter::default(),
        }
    }

    /// A handle on the counts that outlives the body being moved into a unit.
    pub fn counter(&self) -> CallCounter {
        self.counter.clone()
    }
}

impl<T, B> TaskBody<T> for CountingBody<B>
where
    B: TaskBody<T>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn compute(&self, task: TaskId, input: &T) -> Result<T, TaskError> {
        self.counter.record(task);
        self.inner.compute(task, input)
    }
}

/// Build a task unit for `body` whose events go to a new [`RecordingHandler`].
pub fn recording_unit<T, B>(body: B) -> (TaskUnit<T>, Arc<RecordingHandler>)
where
    T: TaskValue,
    B: TaskBody<T> + 'static,
{
    let recorder = Arc::new(RecordingHandler::new());
    let events = Arc::new(EventBus::with_handler(recorder.clone()));
    (TaskUnit::from_body(body, events), recorder)
}
