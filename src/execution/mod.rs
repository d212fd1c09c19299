//! Composition engine.
//!
//! This module sequences and parallelizes task units. The topology decides
//! what the composed result is; the strategy only decides how completion is
//! observed.

mod error;
mod handle;
mod parallel;
mod serial;
mod strategy;
mod unit;

pub use error::{CompositionError, CompositionMisuse, TaskFailure};
pub use handle::{CompositionHandle, Continuation, RunState};
pub use parallel::{CompositionState, ParallelComposition, Settlement, Slot};
pub use serial::{SerialComposition, SerialMachine, SerialOutcome, SerialStep};
pub use strategy::{FailurePolicy, ParallelStrategy, SerialStrategy, Topology, UnknownStrategy};
pub use unit::{Callback, TaskUnit, Thunk, ThunkKind};
