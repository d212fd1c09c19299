//! Serial composition: each task consumes the previous task's output.
//!
//! The chain is a single algorithm, [`SerialMachine`], a fold over the task
//! specs that hands out one pending task at a time. Task `i + 1` is only
//! described once the machine is resumed with task `i`'s output, so ordering
//! is strict under every driver. The drivers differ only in how they wait:
//!
//! - [`SerialComposition::run_blocking`]: direct calls on the current thread
//! - [`SerialComposition::run_with_callback`]: nested completion callbacks
//! - [`SerialComposition::run_chained`]: a chain of boxed futures
//! - [`SerialComposition::run_coroutine`]: resumption through thunks
//! - [`SerialComposition::run`]: a linear `async` loop

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, info_span};

use crate::core::task::{TaskDescriptor, TaskSpec, TaskValue};
use crate::core::types::{RunId, TaskId};
use crate::events::Event;

use super::error::{CompositionError, CompositionMisuse, TaskFailure};
use super::handle::{CompositionHandle, Continuation, await_continuation, join_blocking};
use super::strategy::{SerialStrategy, Topology};
use super::unit::{TaskUnit, ThunkKind};

/// Next thing a serial chain needs.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialStep<T> {
    /// This task must run; resume the machine with its outcome.
    Pending(TaskDescriptor<T>),
    /// The chain is over.
    Done(SerialOutcome<T>),
}

/// How a serial chain ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialOutcome<T> {
    /// Every task succeeded; holds the last output.
    Completed(T),
    /// A task failed; later tasks never ran.
    Failed(TaskFailure),
    /// A task was cancelled; the chain can never complete.
    Stalled(TaskId),
}

impl<T> SerialOutcome<T> {
    pub fn into_result(self) -> Result<T, CompositionError> {
        match self {
            SerialOutcome::Completed(value) => Ok(value),
            SerialOutcome::Failed(failure) => Err(CompositionError::TaskFailed(failure)),
            SerialOutcome::Stalled(task_id) => Err(CompositionError::Stalled {
                cancelled: vec![task_id],
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Idle,
    Awaiting(usize),
    Finished,
}

/// State machine for one serial run.
///
/// States: idle, awaiting task `i`, finished. The machine holds no values;
/// each output travels straight into the next descriptor.
#[derive(Debug, Clone)]
pub struct SerialMachine {
    specs: Arc<[TaskSpec]>,
    position: Position,
}

impl SerialMachine {
    pub fn new(specs: impl Into<Arc<[TaskSpec]>>) -> Self {
        Self {
            specs: specs.into(),
            position: Position::Idle,
        }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Index of the task whose outcome the machine is waiting for.
    pub fn awaiting(&self) -> Option<usize> {
        match self.position {
            Position::Awaiting(index) => Some(index),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.position == Position::Finished
    }

    /// Begin the chain with the initial input.
    ///
    /// An empty chain completes immediately with the input unchanged.
    pub fn start<T>(&mut self, input: T) -> Result<SerialStep<T>, CompositionMisuse> {
        if self.position != Position::Idle {
            return Err(CompositionMisuse::AlreadyStarted);
        }
        Ok(self.advance(0, input))
    }

    /// Feed the outcome of the pending task and get the next step.
    pub fn resume<T>(
        &mut self,
        outcome: Result<T, TaskFailure>,
    ) -> Result<SerialStep<T>, CompositionMisuse> {
        let Position::Awaiting(index) = self.position else {
            return Err(CompositionMisuse::UnexpectedResume);
        };

        match outcome {
            Ok(output) => Ok(self.advance(index + 1, output)),
            Err(failure) => {
                self.position = Position::Finished;
                let outcome = if failure.is_cancelled() {
                    SerialOutcome::Stalled(failure.task_id)
                } else {
                    SerialOutcome::Failed(failure)
                };
                Ok(SerialStep::Done(outcome))
            }
        }
    }

    fn advance<T>(&mut self, index: usize, input: T) -> SerialStep<T> {
        match self.specs.get(index) {
            Some(spec) => {
                self.position = Position::Awaiting(index);
                SerialStep::Pending(spec.describe(input))
            }
            None => {
                self.position = Position::Finished;
                SerialStep::Done(SerialOutcome::Completed(input))
            }
        }
    }
}

/// An ordered chain of tasks sharing one task unit.
pub struct SerialComposition<T> {
    specs: Arc<[TaskSpec]>,
    unit: TaskUnit<T>,
}

impl<T> Clone for SerialComposition<T> {
    fn clone(&self) -> Self {
        Self {
            specs: Arc::clone(&self.specs),
            unit: self.unit.clone(),
        }
    }
}

impl<T: TaskValue> SerialComposition<T> {
    pub fn new(specs: impl IntoIterator<Item = TaskSpec>, unit: TaskUnit<T>) -> Self {
        Self {
            specs: specs.into_iter().collect(),
            unit,
        }
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

    /// A fresh state machine over this chain.
    pub fn machine(&self) -> SerialMachine {
        SerialMachine::new(Arc::clone(&self.specs))
    }

    /// Run the chain with direct blocking calls.
    pub fn run_blocking(&self, input: T) -> Result<T, CompositionError> {
        let mut machine = self.machine();
        let mut step = machine.start(input).unwrap_or_else(|m| m.raise());

        loop {
            match step {
                SerialStep::Pending(descriptor) => {
                    let outcome = self.unit.execute_blocking(descriptor);
                    step = machine.resume(outcome).unwrap_or_else(|m| m.raise());
                }
                SerialStep::Done(outcome) => return outcome.into_result(),
            }
        }
    }

    /// Run the chain as a linear async routine.
    pub async fn run(&self, input: T) -> Result<T, CompositionError> {
        let mut machine = self.machine();
        let mut step = machine.start(input).unwrap_or_else(|m| m.raise());

        loop {
            match step {
                SerialStep::Pending(descriptor) => {
                    let outcome = self.unit.execute(descriptor).await;
                    step = machine.resume(outcome).unwrap_or_else(|m| m.raise());
                }
                SerialStep::Done(outcome) => return outcome.into_result(),
            }
        }
    }

    /// Run the chain as a chain of futures, each stage resolving into the next.
    ///
    /// Every stage is a boxed future that yields the machine and its next
    /// step. Stages are awaited one after another rather than nested, so
    /// polling depth does not grow with the chain.
    pub fn run_chained(&self, input: T) -> BoxFuture<'static, Result<T, CompositionError>> {
        let mut machine = self.machine();
        let step = machine.start(input).unwrap_or_else(|m| m.raise());
        let unit = self.unit.clone();

        async move {
            let mut stage: BoxFuture<'static, (SerialMachine, SerialStep<T>)> =
                future::ready((machine, step)).boxed();
            loop {
                let (machine, step) = stage.await;
                match step {
                    SerialStep::Pending(descriptor) => {
                        stage = next_stage(unit.clone(), machine, descriptor);
                    }
                    SerialStep::Done(outcome) => return outcome.into_result(),
                }
            }
        }
        .boxed()
    }

    /// Run the chain with nested completion callbacks.
    ///
    /// Returns at once. `continuation` receives the final result exactly
    /// once, unless a task is cancelled, in which case it never fires and the
    /// handle reports the stall. Must be called from within a Tokio runtime.
    pub fn run_with_callback<F>(&self, input: T, continuation: F) -> CompositionHandle
    where
        F: FnOnce(Result<T, CompositionError>) + Send + 'static,
    {
        let (unit, handle) = self.scoped_unit();
        let mut machine = self.machine();
        let step = machine.start(input).unwrap_or_else(|m| m.raise());
        drive_callbacks(
            unit,
            machine,
            step,
            Continuation::new(continuation),
            handle.clone(),
        );
        handle
    }

    /// Run the chain as a coroutine that suspends at every task boundary.
    ///
    /// Each pending step is wrapped in a [`Thunk`](super::unit::Thunk); the
    /// thunk's completion resumes the machine. With [`ThunkKind::Blocking`]
    /// the whole chain finishes before this returns.
    pub fn run_coroutine<F>(&self, kind: ThunkKind, input: T, continuation: F) -> CompositionHandle
    where
        F: FnOnce(Result<T, CompositionError>) + Send + 'static,
    {
        let (unit, handle) = self.scoped_unit();
        let mut machine = self.machine();
        let step = machine.start(input).unwrap_or_else(|m| m.raise());
        resume_coroutine(
            unit,
            kind,
            machine,
            step,
            Continuation::new(continuation),
            handle.clone(),
        );
        handle
    }

    /// Run the chain with the given strategy and wait for the result.
    ///
    /// Emits composition events around the run. Blocking strategies run on
    /// the blocking pool so the runtime stays responsive.
    pub async fn execute(
        &self,
        strategy: SerialStrategy,
        input: T,
    ) -> Result<T, CompositionError> {
        let run_id = RunId::new();
        let span = info_span!(
            "serial_composition",
            run = %run_id,
            strategy = %strategy,
            task_count = self.len(),
        );

        async move {
            let events = self.unit.events();
            events.emit(Event::composition_started(
                run_id,
                Topology::Serial,
                self.len(),
            ));
            let start = Instant::now();

            let result = self.dispatch(strategy, input).await;

            debug!(success = result.is_ok(), "serial composition finished");
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

    async fn dispatch(&self, strategy: SerialStrategy, input: T) -> Result<T, CompositionError> {
        match strategy {
            SerialStrategy::Blocking => {
                let composition = self.clone();
                join_blocking(move || composition.run_blocking(input))
                    .await
                    .and_then(|result| result)
            }
            SerialStrategy::Callback => {
                let (tx, rx) = oneshot::channel();
                let handle = self.run_with_callback(input, move |result| {
                    let _ = tx.send(result);
                });
                await_continuation(rx, &handle).await
            }
            SerialStrategy::Future => self.run_chained(input).await,
            SerialStrategy::Coroutine => {
                let (tx, rx) = oneshot::channel();
                let handle = self.run_coroutine(ThunkKind::Suspending, input, move |result| {
                    let _ = tx.send(result);
                });
                await_continuation(rx, &handle).await
            }
            SerialStrategy::CoroutineBlocking => {
                let (tx, rx) = oneshot::channel();
                let composition = self.clone();
                let handle = join_blocking(move || {
                    composition.run_coroutine(ThunkKind::Blocking, input, move |result| {
                        let _ = tx.send(result);
                    })
                })
                .await?;
                await_continuation(rx, &handle).await
            }
            SerialStrategy::Async => self.run(input).await,
        }
    }

    /// Cancel pending tasks of every run of this composition.
    pub fn cancel(&self) {
        self.unit.cancel();
    }

    /// A unit whose cancellation is scoped to one run.
    fn scoped_unit(&self) -> (TaskUnit<T>, CompositionHandle) {
        let token = self.unit.cancellation_token().child_token();
        let handle = CompositionHandle::new(token.clone());
        (self.unit.clone().with_cancellation(token), handle)
    }
}

fn next_stage<T: TaskValue>(
    unit: TaskUnit<T>,
    mut machine: SerialMachine,
    descriptor: TaskDescriptor<T>,
) -> BoxFuture<'static, (SerialMachine, SerialStep<T>)> {
    async move { unit.execute(descriptor).await }
        .map(move |outcome| {
            let step = machine.resume(outcome).unwrap_or_else(|m| m.raise());
            (machine, step)
        })
        .boxed()
}

fn drive_callbacks<T: TaskValue>(
    unit: TaskUnit<T>,
    mut machine: SerialMachine,
    step: SerialStep<T>,
    continuation: Continuation<T>,
    handle: CompositionHandle,
) {
    match step {
        SerialStep::Pending(descriptor) => {
            let next_unit = unit.clone();
            unit.execute_with_callback(descriptor, move |outcome| {
                let step = machine.resume(outcome).unwrap_or_else(|m| m.raise());
                drive_callbacks(next_unit, machine, step, continuation, handle);
            });
        }
        SerialStep::Done(outcome) => settle(outcome, continuation, &handle),
    }
}

fn resume_coroutine<T: TaskValue>(
    unit: TaskUnit<T>,
    kind: ThunkKind,
    mut machine: SerialMachine,
    mut step: SerialStep<T>,
    continuation: Continuation<T>,
    handle: CompositionHandle,
) {
    loop {
        let descriptor = match step {
            SerialStep::Pending(descriptor) => descriptor,
            SerialStep::Done(outcome) => return settle(outcome, continuation, &handle),
        };
        let thunk = unit.thunk(kind, descriptor);

        match kind {
            // The outcome is ready when `invoke` returns; resume in this loop
            // so the stack stays flat however long the chain is.
            ThunkKind::Blocking => {
                let task_id = thunk.task_id();
                let (tx, mut rx) = oneshot::channel();
                thunk.invoke(move |outcome| {
                    let _ = tx.send(outcome);
                });
                let outcome = rx
                    .try_recv()
                    .unwrap_or_else(|_| CompositionMisuse::BlockingThunkDeferred { task_id }.raise());
                step = machine.resume(outcome).unwrap_or_else(|m| m.raise());
            }
            // Each completion runs on a fresh task, so resuming from the callback
            // does not nest.
            ThunkKind::Suspending => {
                thunk.invoke(move |outcome| {
                    let step = machine.resume(outcome).unwrap_or_else(|m| m.raise());
                    resume_coroutine(unit, kind, machine, step, continuation, handle);
                });
                return;
            }
        }
    }
}

fn settle<T>(
    outcome: SerialOutcome<T>,
    mut continuation: Continuation<T>,
    handle: &CompositionHandle,
) {
    if let SerialOutcome::Stalled(task_id) = outcome {
        debug!(task = %task_id, "serial composition stalled");
        handle.mark_stalled(vec![task_id]);
        return;
    }
    handle.mark_finished();
    continuation
        .fire(outcome.into_result())
        .unwrap_or_else(|m| m.raise());
}
