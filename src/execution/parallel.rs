//! Parallel composition: fan one input out to N tasks, rejoin in slot order.
//!
//! All N tasks are launched before any of them may complete. Outputs are
//! ordered by launch slot, never by arrival. Two collectors are offered:
//!
//! - [`ParallelComposition::run_with_callback`]: per-slot bookkeeping in a
//!   [`CompositionState`] updated by each task's completion callback
//! - [`ParallelComposition::run_gather`]: a bulk wait over all task futures
//!
//! Both fire their continuation exactly once and never with partial results.

use futures::future::{join_all, try_join_all};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, info_span};

use crate::core::task::{TaskSpec, TaskValue};
use crate::core::types::{RunId, TaskId};
use crate::events::Event;

use super::error::{CompositionError, CompositionMisuse, TaskFailure};
use super::handle::{CompositionHandle, Continuation, await_continuation};
use super::strategy::{FailurePolicy, ParallelStrategy, Topology};
use super::unit::TaskUnit;

/// Where one fan-out slot stands.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<T> {
    Pending,
    Completed(T),
    Failed(TaskFailure),
    /// The task was cancelled; the slot will never complete.
    Cancelled,
    /// The output was handed to the continuation.
    Consumed,
}

impl<T> Slot<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending)
    }
}

/// Result of recording one slot outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement<T> {
    /// The continuation must not fire yet.
    Waiting,
    /// Fire the continuation with this result. Returned at most once.
    Ready(Result<Vec<T>, CompositionError>),
    /// Every slot settled but these slots were cancelled; the continuation
    /// never fires.
    Stalled(Vec<usize>),
}

/// Per-run bookkeeping for a parallel fan-out.
///
/// Mutated only by the completion handlers of its own tasks. In a
/// multi-threaded runtime it must sit behind a lock so that the slot write
/// and the all-settled check happen together.
#[derive(Debug)]
pub struct CompositionState<T> {
    slots: Vec<Slot<T>>,
    policy: FailurePolicy,
    fired: bool,
}

impl<T> CompositionState<T> {
    pub fn new(len: usize, policy: FailurePolicy) -> Self {
        Self {
            slots: (0..len).map(|_| Slot::Pending).collect(),
            policy,
            fired: false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot<T>> {
        self.slots.get(index)
    }

    pub fn pending_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_pending()).count()
    }

    /// True once no slot is pending.
    pub fn is_complete(&self) -> bool {
        self.pending_count() == 0
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Slots whose task was cancelled.
    pub fn cancelled_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Slot::Cancelled))
            .map(|(index, _)| index)
            .collect()
    }

    /// Settle an empty fan-out, which completes with no outputs.
    pub fn settle_empty(&mut self) -> Settlement<T> {
        if self.is_empty() && !self.fired {
            self.fired = true;
            Settlement::Ready(Ok(Vec::new()))
        } else {
            Settlement::Waiting
        }
    }

    /// Record the outcome of `slot` and report whether the continuation may fire.
    ///
    /// Writing a slot twice, or a slot past the end, is a misuse.
    pub fn record(
        &mut self,
        slot: usize,
        outcome: Result<T, TaskFailure>,
    ) -> Result<Settlement<T>, CompositionMisuse> {
        let len = self.slots.len();
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(CompositionMisuse::SlotOutOfRange { slot, len })?;
        if !entry.is_pending() {
            return Err(CompositionMisuse::SlotWrittenTwice { slot });
        }

        *entry = match outcome {
            Ok(value) => Slot::Completed(value),
            Err(failure) if failure.is_cancelled() => Slot::Cancelled,
            Err(failure) => Slot::Failed(failure.in_slot(slot)),
        };

        if self.fired {
            return Ok(Settlement::Waiting);
        }

        if self.policy == FailurePolicy::FailFast {
            if let Slot::Failed(failure) = &self.slots[slot] {
                self.fired = true;
                return Ok(Settlement::Ready(Err(CompositionError::TaskFailed(
                    failure.clone(),
                ))));
            }
        }

        if !self.is_complete() {
            return Ok(Settlement::Waiting);
        }

        let cancelled = self.cancelled_slots();
        if !cancelled.is_empty() {
            return Ok(Settlement::Stalled(cancelled));
        }

        self.fired = true;
        Ok(Settlement::Ready(self.collect()))
    }

    fn collect(&mut self) -> Result<Vec<T>, CompositionError> {
        let total = self.slots.len();
        let mut values = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for slot in &mut self.slots {
            match std::mem::replace(slot, Slot::Consumed) {
                Slot::Completed(value) => values.push(value),
                Slot::Failed(failure) => failures.push(failure),
                Slot::Pending | Slot::Cancelled | Slot::Consumed => {}
            }
        }

        if failures.is_empty() {
            Ok(values)
        } else {
            Err(CompositionError::Aggregate { failures, total })
        }
    }
}

/// N tasks sharing one input, rejoined into an ordered sequence.
pub struct ParallelComposition<T> {
    specs: Arc<[TaskSpec]>,
    unit: TaskUnit<T>,
    policy: FailurePolicy,
}

impl<T> Clone for ParallelComposition<T> {
    fn clone(&self) -> Self {
        Self {
            specs: Arc::clone(&self.specs),
            unit: self.unit.clone(),
            policy: self.policy,
        }
    }
}

impl<T: TaskValue> ParallelComposition<T> {
    pub fn new(specs: impl IntoIterator<Item = TaskSpec>, unit: TaskUnit<T>) -> Self {
        Self {
            specs: specs.into_iter().collect(),
            unit,
            policy: FailurePolicy::default(),
        }
    }

    /// Builder: set the failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn specs(&self) -> &[TaskSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn unit(&self) -> &TaskUnit<T> {
        &self.unit
    }

    /// Launch every task and collect outcomes through completion callbacks.
    ///
    /// Returns once all tasks are registered. `continuation` fires exactly
    /// once with outputs in slot order, unless a task is cancelled, in which
    /// case it never fires and the handle reports the stall. An empty
    /// fan-out fires before this returns. Must be called from within a Tokio
    /// runtime.
    pub fn run_with_callback<F>(&self, input: T, continuation: F) -> CompositionHandle
    where
        F: FnOnce(Result<Vec<T>, CompositionError>) + Send + 'static,
    {
        let (unit, handle) = self.scoped_unit();
        let mut state = CompositionState::new(self.len(), self.policy);
        let mut continuation = Continuation::new(continuation);

        if self.is_empty() {
            let settlement = state.settle_empty();
            deliver(settlement, &mut continuation, &handle, &self.specs);
            return handle;
        }

        let shared = Arc::new(Mutex::new((state, continuation)));
        for (slot, spec) in self.specs.iter().enumerate() {
            let shared = Arc::clone(&shared);
            let handle = handle.clone();
            let specs = Arc::clone(&self.specs);
            unit.execute_with_callback(spec.describe(input.clone()), move |outcome| {
                let ready = {
                    let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                    let (state, continuation) = &mut *guard;
                    let settlement = state.record(slot, outcome).unwrap_or_else(|m| m.raise());
                    match settlement {
                        Settlement::Waiting => None,
                        settlement => {
                            let taken = continuation.take().unwrap_or_else(|m| m.raise());
                            Some((settlement, taken))
                        }
                    }
                };
                // Fire outside the lock.
                if let Some((settlement, mut continuation)) = ready {
                    deliver(settlement, &mut continuation, &handle, &specs);
                }
            });
        }
        debug!(tasks = self.len(), "parallel tasks registered");
        handle
    }

    /// Launch every task as a future and wait for all of them together.
    ///
    /// Under [`FailurePolicy::FailFast`] the wait ends at the first failure
    /// and the remaining futures are dropped.
    pub async fn run_gather(&self, input: T) -> Result<Vec<T>, CompositionError> {
        let launches = self.specs.iter().enumerate().map(|(slot, spec)| {
            let descriptor = spec.describe(input.clone());
            let unit = self.unit.clone();
            async move {
                unit.execute(descriptor)
                    .await
                    .map_err(|failure| failure.in_slot(slot))
            }
        });

        match self.policy {
            FailurePolicy::CollectAll => {
                let outcomes = join_all(launches).await;
                let mut state = CompositionState::new(outcomes.len(), self.policy);
                let mut settlement = state.settle_empty();
                for (slot, outcome) in outcomes.into_iter().enumerate() {
                    settlement = state.record(slot, outcome).unwrap_or_else(|m| m.raise());
                }
                match settlement {
                    Settlement::Ready(result) => result,
                    Settlement::Stalled(slots) => Err(stall_error(&self.specs, &slots)),
                    Settlement::Waiting => Err(CompositionError::Abandoned),
                }
            }
            FailurePolicy::FailFast => try_join_all(launches).await.map_err(|failure| {
                if failure.is_cancelled() {
                    CompositionError::Stalled {
                        cancelled: vec![failure.task_id],
                    }
                } else {
                    CompositionError::TaskFailed(failure)
                }
            }),
        }
    }

    /// Run the fan-out with the given collector and wait for the result.
    pub async fn execute(
        &self,
        strategy: ParallelStrategy,
        input: T,
    ) -> Result<Vec<T>, CompositionError> {
        let run_id = RunId::new();
        let span = info_span!(
            "parallel_composition",
            run = %run_id,
            strategy = %strategy,
            task_count = self.len(),
        );

        async move {
            let events = self.unit.events();
            events.emit(Event::composition_started(
                run_id,
                Topology::Parallel,
                self.len(),
            ));
            let start = Instant::now();

            let result = match strategy {
                ParallelStrategy::Callback => {
                    let (tx, rx) = oneshot::channel();
                    let handle = self.run_with_callback(input, move |result| {
                        let _ = tx.send(result);
                    });
                    await_continuation(rx, &handle).await
                }
                ParallelStrategy::Gather => self.run_gather(input).await,
            };

            debug!(success = result.is_ok(), "parallel composition finished");
            events.emit(Event::composition_finished(
                run_id,
                result.is_ok(),
                start.elapsed(),
            ));
            result
        }
        .instrument(span)
        .await
    }

    /// Cancel pending tasks of every run of this composition.
    pub fn cancel(&self) {
        self.unit.cancel();
    }

    fn scoped_unit(&self) -> (TaskUnit<T>, CompositionHandle) {
        let token = self.unit.cancellation_token().child_token();
        let handle = CompositionHandle::new(token.clone());
        (self.unit.clone().with_cancellation(token), handle)
    }
}

fn deliver<T>(
    settlement: Settlement<T>,
    continuation: &mut Continuation<Vec<T>>,
    handle: &CompositionHandle,
    specs: &[TaskSpec],
) {
    match settlement {
        Settlement::Waiting => {}
        Settlement::Ready(result) => {
            handle.mark_finished();
            continuation.fire(result).unwrap_or_else(|m| m.raise());
        }
        Settlement::Stalled(slots) => {
            debug!(?slots, "parallel composition stalled");
            let cancelled = slot_ids(specs, &slots);
            handle.mark_stalled(cancelled);
        }
    }
}

fn slot_ids(specs: &[TaskSpec], slots: &[usize]) -> Vec<TaskId> {
    slots
        .iter()
        .filter_map(|&slot| specs.get(slot).map(|spec| spec.id))
        .collect()
}

fn stall_error(specs: &[TaskSpec], slots: &[usize]) -> CompositionError {
    CompositionError::Stalled {
        cancelled: slot_ids(specs, slots),
    }
}
