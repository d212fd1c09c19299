//! Task and composition events.
//!
//! Every task emits a request event before its body runs and a response,
//! error or cancellation event afterwards. Events go to an [`EventBus`],
//! which fans them out to any number of [`EventHandler`] sinks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::core::types::{RunId, TaskId};
use crate::execution::Topology;

/// Which point of a task's life an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Request,
    Response,
    Error,
    Cancelled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Request => "request",
            Phase::Response => "response",
            Phase::Error => "error",
            Phase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Events emitted while tasks and compositions run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A task was handed its input.
    TaskRequested {
        task_id: TaskId,
        value: Value,
        timestamp: DateTime<Utc>,
    },

    /// A task produced its output.
    TaskResponded {
        task_id: TaskId,
        value: Value,
        timestamp: DateTime<Utc>,
    },

    /// A task body returned an error.
    TaskFailed {
        task_id: TaskId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A pending task was cancelled before its body ran.
    TaskCancelled {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },

    /// A composition run began.
    CompositionStarted {
        run_id: RunId,
        topology: Topology,
        task_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A composition run delivered its result.
    CompositionFinished {
        run_id: RunId,
        success: bool,
        duration: Duration,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::TaskRequested { timestamp, .. } => *timestamp,
            Event::TaskResponded { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::TaskCancelled { timestamp, .. } => *timestamp,
            Event::CompositionStarted { timestamp, .. } => *timestamp,
            Event::CompositionFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Task the event belongs to, if it is a task event.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::TaskRequested { task_id, .. }
            | Event::TaskResponded { task_id, .. }
            | Event::TaskFailed { task_id, .. }
            | Event::TaskCancelled { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }

    /// Task phase, if it is a task event.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Event::TaskRequested { .. } => Some(Phase::Request),
            Event::TaskResponded { .. } => Some(Phase::Response),
            Event::TaskFailed { .. } => Some(Phase::Error),
            Event::TaskCancelled { .. } => Some(Phase::Cancelled),
            _ => None,
        }
    }

    /// Value carried by a request or response event.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Event::TaskRequested { value, .. } | Event::TaskResponded { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Create a TaskRequested event.
    pub fn task_requested<T: Serialize>(task_id: TaskId, input: &T) -> Self {
        Event::TaskRequested {
            task_id,
            value: snapshot(input),
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskResponded event.
    pub fn task_responded<T: Serialize>(task_id: TaskId, output: &T) -> Self {
        Event::TaskResponded {
            task_id,
            value: snapshot(output),
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(task_id: TaskId, error: impl Into<String>) -> Self {
        Event::TaskFailed {
            task_id,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskCancelled event.
    pub fn task_cancelled(task_id: TaskId) -> Self {
        Event::TaskCancelled {
            task_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a CompositionStarted event.
    pub fn composition_started(run_id: RunId, topology: Topology, task_count: usize) -> Self {
        Event::CompositionStarted {
            run_id,
            topology,
            task_count,
            timestamp: Utc::now(),
        }
    }

    /// Create a CompositionFinished event.
    pub fn composition_finished(run_id: RunId, success: bool, duration: Duration) -> Self {
        Event::CompositionFinished {
            run_id,
            success,
            duration,
            timestamp: Utc::now(),
        }
    }
}

fn snapshot<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Sink for events.
///
/// Handlers are called on whatever thread emits the event, including threads
/// blocked inside a synchronous task, so they must not block for long.
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Create a bus with one handler already registered.
    pub fn with_handler(handler: Arc<dyn EventHandler>) -> Self {
        let bus = Self::new();
        bus.register(handler);
        bus
    }

    /// Register an event handler.
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub fn emit(&self, event: Event) {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler.handle(&event);
        }
    }

    /// Get the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every event through `tracing`.
pub struct TracingHandler;

impl EventHandler for TracingHandler {
    fn handle(&self, event: &Event) {
        match event {
            Event::TaskRequested { task_id, value, .. } => {
                info!(task = %task_id, phase = %Phase::Request, value = %value, "task request");
            }
            Event::TaskResponded { task_id, value, .. } => {
                info!(task = %task_id, phase = %Phase::Response, value = %value, "task response");
            }
            Event::TaskFailed { task_id, error, .. } => {
                warn!(task = %task_id, phase = %Phase::Error, error = %error, "task failed");
            }
            Event::TaskCancelled { task_id, .. } => {
                warn!(task = %task_id, phase = %Phase::Cancelled, "task cancelled");
            }
            Event::CompositionStarted {
                run_id,
                topology,
                task_count,
                ..
            } => {
                info!(run = %run_id, topology = %topology, task_count, "composition started");
            }
            Event::CompositionFinished {
                run_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!(run = %run_id, duration_ms = duration.as_millis() as u64, "composition finished");
                } else {
                    warn!(run = %run_id, duration_ms = duration.as_millis() as u64, "composition failed");
                }
            }
        }
    }
}

/// Forwards events into a channel.
///
/// Events emitted after the receiver is dropped are discarded.
pub struct ChannelHandler {
    sender: UnboundedSender<Event>,
}

impl ChannelHandler {
    pub fn new(sender: UnboundedSender<Event>) -> Self {
        Self { sender }
    }
}

impl EventHandler for ChannelHandler {
    fn handle(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }
}
