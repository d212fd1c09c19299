//! YAML configuration parsing.
//!
//! Parses demo run settings from YAML files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::execution::FailurePolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Settings for one demo run.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Simulated latency of each composed task, in milliseconds.
    pub duration_ms: u64,
    /// Number of composed tasks.
    pub tasks: usize,
    /// Id of the first composed task; the rest follow consecutively.
    pub first_task_id: u32,
    /// Input for the composition. When absent a seed task computes it.
    pub initial_input: Option<i64>,
    /// The body every task evaluates.
    pub body: BodyConfig,
    /// Composed task ids that fail instead of producing a value.
    pub fail_tasks: Vec<u32>,
    /// How a parallel run treats failures.
    pub failure_policy: FailurePolicy,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            duration_ms: 1000,
            tasks: 3,
            first_task_id: 2,
            initial_input: None,
            body: BodyConfig::default(),
            fail_tasks: Vec::new(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl DemoConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Ids of the composed tasks, in launch order.
    pub fn task_ids(&self) -> std::ops::Range<u32> {
        let end = self.first_task_id.saturating_add(self.tasks as u32);
        self.first_task_id..end
    }

    /// Check the config for values that cannot describe a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let BodyConfig::Random { min, max } = self.body {
            if min > max {
                return Err(ConfigError::InvalidConfig(format!(
                    "random body min ({}) is greater than max ({})",
                    min, max
                )));
            }
        }

        if u32::try_from(self.tasks)
            .ok()
            .and_then(|tasks| self.first_task_id.checked_add(tasks))
            .is_none()
        {
            return Err(ConfigError::InvalidConfig(format!(
                "{} task(s) starting at id {} overflow the id range",
                self.tasks, self.first_task_id
            )));
        }

        let ids = self.task_ids();
        for id in &self.fail_tasks {
            if !ids.contains(id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "fail task {} is not one of the composed tasks ({}..{})",
                    id, ids.start, ids.end
                )));
            }
        }

        Ok(())
    }
}

/// Body configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyConfig {
    /// A fresh uniform integer in `min..=max`, ignoring the input.
    Random {
        #[serde(default = "default_random_min")]
        min: i64,
        #[serde(default = "default_random_max")]
        max: i64,
    },
    /// `input + step`.
    Increment {
        #[serde(default = "default_step")]
        step: i64,
    },
    /// `input * factor`.
    Multiply { factor: i64 },
    /// The input unchanged.
    Identity,
}

impl Default for BodyConfig {
    fn default() -> Self {
        BodyConfig::Random {
            min: default_random_min(),
            max: default_random_max(),
        }
    }
}

impl BodyConfig {
    /// Whether the body's output is a pure function of its input.
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, BodyConfig::Random { .. })
    }
}

fn default_random_min() -> i64 {
    1
}

fn default_random_max() -> i64 {
    100
}

fn default_step() -> i64 {
    1
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a demo configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<DemoConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_config(&content)
    }

    /// Parse a demo configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<DemoConfig, ConfigError> {
        // An empty document deserializes as null, not as an empty map.
        if yaml.trim().is_empty() {
            return Ok(DemoConfig::default());
        }
        let config: DemoConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}
