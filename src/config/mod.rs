//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for demo runs.

mod builder;
mod yaml;

pub use builder::{DemoConfigBuilder, load_demo_config};
pub use yaml::{BodyConfig, ConfigError, DemoConfig, YamlLoader};
