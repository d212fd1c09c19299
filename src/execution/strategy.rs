//! Composition topologies, suspension strategies and failure policies.
//!
//! A strategy only changes how completion is observed. For the same inputs
//! and a deterministic body every serial strategy yields the same value, and
//! every parallel strategy yields the same ordered sequence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Shape of a composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Each task consumes the previous task's output.
    Serial,
    /// All tasks share one input and rejoin into an ordered sequence.
    Parallel,
}

/// How a serial chain waits for each task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SerialStrategy {
    /// Direct sequential calls on the current thread.
    Blocking,
    /// Nested completion callbacks.
    Callback,
    /// A chain of futures, each stage resolving into the next.
    Future,
    /// A state machine resumed by suspending thunks.
    Coroutine,
    /// A state machine resumed by thunks that complete synchronously.
    CoroutineBlocking,
    /// A linear `async` routine.
    Async,
}

impl SerialStrategy {
    pub const ALL: [SerialStrategy; 6] = [
        SerialStrategy::Blocking,
        SerialStrategy::Callback,
        SerialStrategy::Future,
        SerialStrategy::Coroutine,
        SerialStrategy::CoroutineBlocking,
        SerialStrategy::Async,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SerialStrategy::Blocking => "blocking",
            SerialStrategy::Callback => "callback",
            SerialStrategy::Future => "future",
            SerialStrategy::Coroutine => "coroutine",
            SerialStrategy::CoroutineBlocking => "coroutine-blocking",
            SerialStrategy::Async => "async",
        }
    }

    /// Whether the strategy occupies the calling thread while tasks wait.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            SerialStrategy::Blocking | SerialStrategy::CoroutineBlocking
        )
    }
}

/// How a parallel fan-out collects its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParallelStrategy {
    /// Per-slot completion flags updated from callbacks.
    Callback,
    /// A bulk wait over all task futures.
    Gather,
}

impl ParallelStrategy {
    pub const ALL: [ParallelStrategy; 2] = [ParallelStrategy::Callback, ParallelStrategy::Gather];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParallelStrategy::Callback => "callback",
            ParallelStrategy::Gather => "gather",
        }
    }
}

/// What a parallel composition does when a task fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Wait for every slot to settle, then report all failures together.
    #[default]
    CollectAll,
    /// Report the first failure immediately and ignore later results.
    FailFast,
}

/// Error for unrecognised strategy names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for SerialStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SerialStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

impl FromStr for ParallelStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParallelStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Serial => f.write_str("serial"),
            Topology::Parallel => f.write_str("parallel"),
        }
    }
}

impl fmt::Display for SerialStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ParallelStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
