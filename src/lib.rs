pub mod config;
pub mod core;
pub mod demo;
pub mod events;
pub mod execution;
pub mod testing;

pub use config::{BodyConfig, ConfigError, DemoConfig, DemoConfigBuilder, YamlLoader};
pub use core::body::{CheckedArith, FailOn, FailingBody, Identity, Increment, Multiply, RandomBody};
pub use core::task::{TaskBody, TaskDescriptor, TaskError, TaskSpec, TaskValue};
pub use core::types::{RunId, TaskId};
pub use demo::{Demo, DemoDriver, DemoError, DemoKind, DemoOutput, DemoReport};
pub use events::{ChannelHandler, Event, EventBus, EventHandler, Phase, TracingHandler};
pub use execution::{
    CompositionError, CompositionHandle, CompositionMisuse, CompositionState, FailurePolicy,
    ParallelComposition, ParallelStrategy, RunState, SerialComposition, SerialMachine,
    SerialStrategy, Settlement, TaskFailure, TaskUnit, ThunkKind, Topology,
};
