//! Demo catalog and driver.
//!
//! A demo is one topology paired with one strategy. The driver runs exactly
//! one demo at a time: it seeds the input, runs the composition, then closes
//! with an epilogue task on the result.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ConfigError, DemoConfig, DemoConfigBuilder};
use crate::core::task::TaskSpec;
use crate::core::types::TaskId;
use crate::events::EventBus;
use crate::execution::{
    CompositionError, ParallelComposition, ParallelStrategy, SerialComposition, SerialStrategy,
    TaskUnit, Topology,
};

/// Errors from the demo driver.
#[derive(Debug, Error)]
pub enum DemoError {
    /// Another demo is still running on this driver.
    #[error("a demo is already running")]
    AlreadyRunning,

    /// The demo name is not in the catalog.
    #[error("unknown demo '{0}'")]
    UnknownDemo(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Composition(#[from] CompositionError),
}

/// One topology and strategy combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Demo {
    SerialBlocking,
    SerialCallback,
    SerialFuture,
    SerialCoroutine,
    SerialCoroutineBlocking,
    SerialAsync,
    ParallelCallback,
    ParallelGather,
}

/// The composition a demo runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoKind {
    Serial(SerialStrategy),
    Parallel(ParallelStrategy),
}

impl Demo {
    pub const ALL: [Demo; 8] = [
        Demo::SerialBlocking,
        Demo::SerialCallback,
        Demo::SerialFuture,
        Demo::SerialCoroutine,
        Demo::SerialCoroutineBlocking,
        Demo::SerialAsync,
        Demo::ParallelCallback,
        Demo::ParallelGather,
    ];

    pub fn all() -> &'static [Demo] {
        &Self::ALL
    }

    pub fn kind(&self) -> DemoKind {
        match self {
            Demo::SerialBlocking => DemoKind::Serial(SerialStrategy::Blocking),
            Demo::SerialCallback => DemoKind::Serial(SerialStrategy::Callback),
            Demo::SerialFuture => DemoKind::Serial(SerialStrategy::Future),
            Demo::SerialCoroutine => DemoKind::Serial(SerialStrategy::Coroutine),
            Demo::SerialCoroutineBlocking => DemoKind::Serial(SerialStrategy::CoroutineBlocking),
            Demo::SerialAsync => DemoKind::Serial(SerialStrategy::Async),
            Demo::ParallelCallback => DemoKind::Parallel(ParallelStrategy::Callback),
            Demo::ParallelGather => DemoKind::Parallel(ParallelStrategy::Gather),
        }
    }

    pub fn topology(&self) -> Topology {
        match self.kind() {
            DemoKind::Serial(_) => Topology::Serial,
            DemoKind::Parallel(_) => Topology::Parallel,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Demo::SerialBlocking => "serial-blocking",
            Demo::SerialCallback => "serial-callback",
            Demo::SerialFuture => "serial-future",
            Demo::SerialCoroutine => "serial-coroutine",
            Demo::SerialCoroutineBlocking => "serial-coroutine-blocking",
            Demo::SerialAsync => "serial-async",
            Demo::ParallelCallback => "parallel-callback",
            Demo::ParallelGather => "parallel-gather",
        }
    }

    /// One-line summary for listings.
    pub fn description(&self) -> &'static str {
        match self {
            Demo::SerialBlocking => "chain of direct calls that block the caller",
            Demo::SerialCallback => "chain of nested completion callbacks",
            Demo::SerialFuture => "chain of futures, each stage resolving the next",
            Demo::SerialCoroutine => "state machine resumed by suspending thunks",
            Demo::SerialCoroutineBlocking => "state machine resumed by synchronous thunks",
            Demo::SerialAsync => "linear async routine",
            Demo::ParallelCallback => "fan-out rejoined by per-slot completion flags",
            Demo::ParallelGather => "fan-out rejoined by waiting on all futures",
        }
    }
}

impl fmt::Display for Demo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Demo {
    type Err = DemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Demo::ALL
            .into_iter()
            .find(|demo| demo.as_str() == s)
            .ok_or_else(|| DemoError::UnknownDemo(s.to_string()))
    }
}

/// What the composition produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoOutput {
    /// The last output of a serial chain.
    Serial(i64),
    /// Every parallel output, in slot order.
    Parallel(Vec<i64>),
}

/// Summary of a finished demo.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub demo: Demo,
    /// Input handed to the composition.
    pub seed: i64,
    pub output: DemoOutput,
    /// Result of the closing task, for serial demos.
    pub epilogue: Option<i64>,
    pub elapsed: Duration,
}

/// Runs demos against a fixed configuration, one at a time.
pub struct DemoDriver {
    config: DemoConfig,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl DemoDriver {
    /// Create a driver, rejecting an invalid config.
    pub fn new(config: DemoConfig, events: Arc<EventBus>) -> Result<Self, DemoError> {
        config.validate()?;
        Ok(Self {
            config,
            events,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DemoConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Token that cancels every pending task of the live demo.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run one demo to completion.
    ///
    /// Fails with [`DemoError::AlreadyRunning`] while another run is live.
    pub async fn run(&self, demo: Demo) -> Result<DemoReport, DemoError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let start = Instant::now();
        info!(demo = %demo, tasks = self.config.tasks, "starting demo");

        let seed = self.seed().await?;
        let unit = TaskUnit::new(DemoConfigBuilder::build_body(&self.config), self.events.clone())
            .with_cancellation(self.cancel.child_token());
        let specs = DemoConfigBuilder::build_specs(&self.config);

        let (output, epilogue) = match demo.kind() {
            DemoKind::Serial(strategy) => {
                let result = SerialComposition::new(specs, unit)
                    .execute(strategy, seed)
                    .await?;
                let epilogue = self.bookend(self.epilogue_id(), result).await?;
                (DemoOutput::Serial(result), Some(epilogue))
            }
            DemoKind::Parallel(strategy) => {
                let outputs = ParallelComposition::new(specs, unit)
                    .with_policy(self.config.failure_policy)
                    .execute(strategy, seed)
                    .await?;
                info!(?outputs, "parallel outputs gathered");
                (DemoOutput::Parallel(outputs), None)
            }
        };

        let report = DemoReport {
            demo,
            seed,
            output,
            epilogue,
            elapsed: start.elapsed(),
        };
        info!(demo = %demo, elapsed = ?report.elapsed, "demo finished");
        Ok(report)
    }

    async fn seed(&self) -> Result<i64, DemoError> {
        match self.config.initial_input {
            Some(input) => Ok(input),
            None => {
                let id = TaskId::new(self.config.first_task_id.saturating_sub(1));
                self.bookend(id, 0).await
            }
        }
    }

    fn epilogue_id(&self) -> TaskId {
        let ids = self.config.task_ids();
        TaskId::new(ids.end)
    }

    /// Run one undelayed, non-failing task outside the composition.
    async fn bookend(&self, id: TaskId, input: i64) -> Result<i64, DemoError> {
        debug!(task = %id, "running bookend task");
        let unit = TaskUnit::new(
            DemoConfigBuilder::plain_body(&self.config.body),
            self.events.clone(),
        )
        .with_cancellation(self.cancel.child_token());
        let output = unit
            .execute(TaskSpec::new(id).describe(input))
            .await
            .map_err(CompositionError::from)?;
        Ok(output)
    }
}

/// Marks a driver busy for the lifetime of one run.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Result<Self, DemoError> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DemoError::AlreadyRunning)?;
        Ok(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
