//! Configuration integration tests.
//!
//! These tests load demo configs from disk and build compositions from them.

use braid::{BodyConfig, ConfigError, DemoConfigBuilder, FailurePolicy, TaskId, YamlLoader};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

/// Test: A config file round-trips into task specs and a working body.
#[test]
fn test_config_file_builds_composition_parts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("demo.yaml");
    fs::write(
        &path,
        r#"
duration_ms: 20
tasks: 2
first_task_id: 1
body:
  type: increment
  step: 10
fail_tasks: [2]
failure_policy: fail_fast
"#,
    )
    .unwrap();

    let config = YamlLoader::load_config(&path).unwrap();
    let specs = DemoConfigBuilder::build_specs(&config);
    let body = DemoConfigBuilder::build_body(&config);

    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].id, TaskId::new(1));
    assert_eq!(specs[1].duration, Some(Duration::from_millis(20)));
    assert_eq!(body.compute(TaskId::new(1), &0), Ok(10));
    assert!(body.compute(TaskId::new(2), &0).is_err());
    assert_eq!(config.failure_policy, FailurePolicy::FailFast);
}

/// Test: Invalid values are rejected with a descriptive error.
#[test]
fn test_invalid_config_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.yaml");
    fs::write(&path, "body:\n  type: random\n  min: 50\n  max: 5\n").unwrap();

    let err = YamlLoader::load_config(&path).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidConfig(_)));
}

/// Test: Malformed YAML is a parse error, not a validation error.
#[test]
fn test_malformed_yaml_is_parse_error() {
    let err = YamlLoader::parse_config("tasks: [oops").unwrap_err();
    assert!(matches!(err, ConfigError::YamlError(_)));
}

/// Test: The default body draws from 1..=100 like the classic demo.
#[test]
fn test_default_body_is_random_percentile() {
    let config = YamlLoader::parse_config("tasks: 1").unwrap();
    assert_eq!(config.body, BodyConfig::Random { min: 1, max: 100 });

    let body = DemoConfigBuilder::build_body(&config);
    for _ in 0..100 {
        let value = body.compute(TaskId::new(2), &0).unwrap();
        assert!((1..=100).contains(&value));
    }
}
