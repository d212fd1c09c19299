//! Parallel composition integration tests.
//!
//! These tests verify ordered rejoin, exactly-once delivery and failure policies.

use braid::events::Phase;
use braid::{
    CompositionError, CompositionMisuse, CompositionState, FailOn, FailurePolicy, Increment,
    Multiply, ParallelComposition, ParallelStrategy, RunState, Settlement, TaskId, TaskSpec,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::common::{instrumented_unit, specs, wait_for_settled};

/// Slots finish in the order 1, 0, 2.
fn out_of_order_specs() -> Vec<TaskSpec> {
    vec![
        TaskSpec::new(2).with_duration(Duration::from_millis(200)),
        TaskSpec::new(3).with_duration(Duration::from_millis(50)),
        TaskSpec::new(4).with_duration(Duration::from_millis(400)),
    ]
}

/// Test: Doubling a shared input of 5 yields [10, 10, 10] in slot order.
#[tokio::test(start_paused = true)]
async fn test_fan_out_doubles_shared_input() {
    for strategy in ParallelStrategy::ALL {
        let (unit, recorder, counter) = instrumented_unit(Multiply::new(2));
        let composition = ParallelComposition::new(out_of_order_specs(), unit);

        let result = composition.execute(strategy, 5).await;

        assert_eq!(result, Ok(vec![10, 10, 10]), "strategy {}", strategy);
        assert_eq!(counter.total(), 3);
        assert_eq!(recorder.values(Phase::Request), vec![serde_json::json!(5); 3]);
    }
}

/// Test: Outputs follow launch slots even when ids are unrelated to position.
#[tokio::test(start_paused = true)]
async fn test_order_follows_slots_not_ids() {
    let (unit, _recorder, _counter) = instrumented_unit(Increment::new(0));
    let specs = vec![
        TaskSpec::new(40).with_duration(Duration::from_millis(30)),
        TaskSpec::new(7).with_duration(Duration::from_millis(10)),
        TaskSpec::new(40).with_duration(Duration::from_millis(20)),
    ];
    let composition = ParallelComposition::new(specs, unit);

    assert_eq!(
        composition.execute(ParallelStrategy::Callback, 1).await,
        Ok(vec![1, 1, 1])
    );
}

/// Test: Every task is requested before any of them responds.
#[tokio::test(start_paused = true)]
async fn test_all_tasks_registered_before_any_completes() {
    for strategy in ParallelStrategy::ALL {
        let (unit, recorder, _counter) = instrumented_unit(Increment::new(1));
        let composition = ParallelComposition::new(specs(1, 4, 100), unit);

        composition.execute(strategy, 0).await.unwrap();

        let trace = recorder.task_trace();
        let first_response = trace
            .iter()
            .position(|(_, phase)| *phase == Phase::Response)
            .unwrap();
        assert_eq!(first_response, 4, "strategy {}", strategy);
    }
}

/// Test: The continuation fires exactly once, after the last slot settles.
#[tokio::test(start_paused = true)]
async fn test_continuation_fires_once_after_all_slots() {
    let (unit, recorder, _counter) = instrumented_unit(Increment::new(1));
    let composition = ParallelComposition::new(out_of_order_specs(), unit);
    let fired = Arc::new(AtomicUsize::new(0));
    let responses_at_fire = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();

    let counter = Arc::clone(&fired);
    let seen = Arc::clone(&responses_at_fire);
    let observer = Arc::clone(&recorder);
    let handle = composition.run_with_callback(0, move |result| {
        counter.fetch_add(1, Ordering::SeqCst);
        seen.store(observer.count(Phase::Response), Ordering::SeqCst);
        let _ = tx.send(result);
    });

    assert_eq!(rx.await.unwrap(), Ok(vec![1, 1, 1]));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(responses_at_fire.load(Ordering::SeqCst), 3);
    assert_eq!(handle.state(), RunState::Finished);
}

/// Test: An empty fan-out completes with an empty sequence.
#[tokio::test(start_paused = true)]
async fn test_empty_fan_out() {
    for strategy in ParallelStrategy::ALL {
        let (unit, recorder, _counter) = instrumented_unit(Increment::new(1));
        let composition = ParallelComposition::new(Vec::<TaskSpec>::new(), unit);

        assert_eq!(composition.execute(strategy, 3).await, Ok(vec![]));
        assert!(recorder.task_trace().is_empty());
    }
}

/// Test: Collect-all waits for every slot and aggregates the failures.
#[tokio::test(start_paused = true)]
async fn test_collect_all_aggregates_failures() {
    for strategy in ParallelStrategy::ALL {
        let body = FailOn::new(Increment::new(1), [TaskId::new(2), TaskId::new(4)]);
        let (unit, _recorder, counter) = instrumented_unit(body);
        let composition = ParallelComposition::new(out_of_order_specs(), unit);

        let err = composition.execute(strategy, 0).await.unwrap_err();

        match err {
            CompositionError::Aggregate { failures, total } => {
                assert_eq!(total, 3);
                let failed: Vec<_> = failures.iter().map(|f| (f.task_id.get(), f.slot)).collect();
                assert_eq!(failed, vec![(2, Some(0)), (4, Some(2))]);
            }
            other => panic!("expected aggregate failure, got {:?}", other),
        }
        assert_eq!(counter.total(), 3, "strategy {}", strategy);
    }
}

/// Test: Fail-fast reports the first failure to arrive.
#[tokio::test(start_paused = true)]
async fn test_fail_fast_reports_earliest_failure() {
    for strategy in ParallelStrategy::ALL {
        // Slot 1 (task 3) fails first at 50ms; slot 2 (task 4) would fail later.
        let body = FailOn::new(Increment::new(1), [TaskId::new(3), TaskId::new(4)]);
        let (unit, _recorder, _counter) = instrumented_unit(body);
        let composition = ParallelComposition::new(out_of_order_specs(), unit)
            .with_policy(FailurePolicy::FailFast);

        let err = composition.execute(strategy, 0).await.unwrap_err();

        match err {
            CompositionError::TaskFailed(failure) => {
                assert_eq!(failure.task_id, TaskId::new(3), "strategy {}", strategy);
                assert_eq!(failure.slot, Some(1));
            }
            other => panic!("expected single failure, got {:?}", other),
        }
    }
}

/// Test: Cancelling a pending fan-out stalls it and the continuation never fires.
#[tokio::test(start_paused = true)]
async fn test_cancel_stalls_fan_out() {
    let (unit, recorder, _counter) = instrumented_unit(Increment::new(1));
    let composition = ParallelComposition::new(out_of_order_specs(), unit);
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&fired);
    let handle = composition.run_with_callback(0, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Slot 1 completes, then the rest are cancelled.
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();

    let state = wait_for_settled(&handle, Duration::from_secs(5)).await;

    assert_eq!(
        state,
        RunState::Stalled {
            cancelled: vec![TaskId::new(2), TaskId::new(4)]
        }
    );
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.count(Phase::Response), 1);
    assert_eq!(recorder.count(Phase::Cancelled), 2);
}

/// Test: Writing a slot twice is reported as misuse.
#[test]
fn test_double_slot_write_is_misuse() {
    let mut state = CompositionState::new(3, FailurePolicy::CollectAll);

    assert_eq!(state.record(0, Ok(1)), Ok(Settlement::Waiting));
    assert_eq!(
        state.record(0, Ok(2)),
        Err(CompositionMisuse::SlotWrittenTwice { slot: 0 })
    );
}

/// Test: Misuse is fatal when it reaches a driver.
#[test]
#[should_panic(expected = "composition misuse: slot 0 written twice")]
fn test_misuse_panics_when_raised() {
    let mut state = CompositionState::new(1, FailurePolicy::CollectAll);
    state.record(0, Ok(1)).unwrap();
    state.record(0, Ok(1)).unwrap_or_else(|misuse| misuse.raise());
}
