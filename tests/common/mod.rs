//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use braid::events::Phase;
use braid::testing::{CallCounter, CountingBody, RecordingHandler, recording_unit};
use braid::{CompositionHandle, RunState, TaskBody, TaskId, TaskSpec, TaskUnit};
use std::sync::Arc;
use std::time::Duration;

/// Build a unit over `body` that records events and counts evaluations.
pub fn instrumented_unit<B>(body: B) -> (TaskUnit<i64>, Arc<RecordingHandler>, CallCounter)
where
    B: TaskBody<i64> + 'static,
{
    let body = CountingBody::new(body);
    let counter = body.counter();
    let (unit, recorder) = recording_unit(body);
    (unit, recorder, counter)
}

/// Consecutive task specs with the same latency.
pub fn specs(first_id: u32, count: usize, millis: u64) -> Vec<TaskSpec> {
    TaskSpec::sequence(first_id, count, Some(Duration::from_millis(millis)))
}

/// Assert that every task finished before the next one was requested.
///
/// `ids` is the expected chain order. Each task must show a request followed
/// directly by its response, and no task may be requested before its
/// predecessor responded.
pub fn assert_causal_chain(trace: &[(TaskId, Phase)], ids: &[u32]) {
    let expected: Vec<(TaskId, Phase)> = ids
        .iter()
        .flat_map(|&id| [(TaskId::new(id), Phase::Request), (TaskId::new(id), Phase::Response)])
        .collect();
    assert_eq!(trace, expected.as_slice(), "chain events out of causal order");
}

/// Wait for a callback-driven run to leave the running state.
///
/// Polls every 10ms of (possibly paused) Tokio time.
///
/// # Panics
///
/// Panics if the run is still running after `timeout`.
pub async fn wait_for_settled(handle: &CompositionHandle, timeout: Duration) -> RunState {
    let start = tokio::time::Instant::now();
    loop {
        let state = handle.state();
        if state != RunState::Running {
            return state;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for composition to settle, state: {:?}", state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
