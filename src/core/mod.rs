//! Core domain types: identifiers, task bodies and task descriptors.

pub mod body;
pub mod task;
pub mod types;
