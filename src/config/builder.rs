//! Composition builder from YAML configuration.
//!
//! This module converts a DemoConfig into task bodies and task specs.

use std::path::Path;
use std::sync::Arc;

use crate::core::body::{FailOn, Identity, Increment, Multiply, RandomBody};
use crate::core::task::{TaskBody, TaskSpec};
use crate::core::types::TaskId;

use super::yaml::{BodyConfig, ConfigError, DemoConfig, YamlLoader};

/// Builder for creating composition parts from configuration.
pub struct DemoConfigBuilder;

impl DemoConfigBuilder {
    /// Build the task body, wrapped to fail the configured tasks.
    pub fn build_body(config: &DemoConfig) -> Arc<dyn TaskBody<i64>> {
        let failing = config.fail_tasks.iter().copied().map(TaskId::new);
        if config.fail_tasks.is_empty() {
            Self::plain_body(&config.body)
        } else {
            match config.body {
                BodyConfig::Random { min, max } => {
                    Arc::new(FailOn::new(RandomBody::new(min, max), failing))
                }
                BodyConfig::Increment { step } => {
                    Arc::new(FailOn::new(Increment::new(step), failing))
                }
                BodyConfig::Multiply { factor } => {
                    Arc::new(FailOn::new(Multiply::new(factor), failing))
                }
                BodyConfig::Identity => Arc::new(FailOn::new(Identity, failing)),
            }
        }
    }

    /// Build the body without failure injection.
    ///
    /// Used for the bookend tasks around a composition, which never fail.
    pub fn plain_body(body: &BodyConfig) -> Arc<dyn TaskBody<i64>> {
        match *body {
            BodyConfig::Random { min, max } => Arc::new(RandomBody::new(min, max)),
            BodyConfig::Increment { step } => Arc::new(Increment::new(step)),
            BodyConfig::Multiply { factor } => Arc::new(Multiply::new(factor)),
            BodyConfig::Identity => Arc::new(Identity),
        }
    }

    /// Specs of the composed tasks, in launch order.
    pub fn build_specs(config: &DemoConfig) -> Vec<TaskSpec> {
        TaskSpec::sequence(config.first_task_id, config.tasks, Some(config.duration()))
    }
}

/// Load and validate a config file.
///
/// A missing path yields the defaults.
pub fn load_demo_config(path: Option<&Path>) -> Result<DemoConfig, ConfigError> {
    match path {
        Some(path) => YamlLoader::load_config(path),
        None => Ok(DemoConfig::default()),
    }
}
