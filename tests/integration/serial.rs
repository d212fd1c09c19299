//! Serial composition integration tests.
//!
//! These tests run chains through the public API under every strategy.

use braid::events::Phase;
use braid::{
    CompositionError, FailOn, Increment, RunState, SerialComposition, SerialStrategy, TaskId,
    TaskSpec, ThunkKind,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::common::{assert_causal_chain, instrumented_unit, specs, wait_for_settled};

/// Test: A chain of three increments starting at 0 yields 3 under every strategy.
#[tokio::test(start_paused = true)]
async fn test_increment_chain_under_every_strategy() {
    for strategy in SerialStrategy::ALL {
        let (unit, recorder, counter) = instrumented_unit(Increment::new(1));
        let composition = SerialComposition::new(specs(1, 3, 20), unit);

        let result = composition.execute(strategy, 0).await;

        assert_eq!(result, Ok(3), "strategy {}", strategy);
        assert_eq!(counter.total(), 3, "strategy {}", strategy);
        assert_causal_chain(&recorder.task_trace(), &[1, 2, 3]);
    }
}

/// Test: Re-running a deterministic chain gives the same result.
#[tokio::test(start_paused = true)]
async fn test_rerun_is_idempotent() {
    let (unit, _recorder, _counter) = instrumented_unit(Increment::new(5));
    let composition = SerialComposition::new(specs(1, 4, 10), unit);

    let first = composition.execute(SerialStrategy::Future, 2).await;
    let second = composition.execute(SerialStrategy::Future, 2).await;

    assert_eq!(first, Ok(22));
    assert_eq!(first, second);
}

/// Test: A failure in task 2 of 3 aborts the chain before task 3 runs.
#[tokio::test(start_paused = true)]
async fn test_failure_aborts_remaining_chain() {
    for strategy in SerialStrategy::ALL {
        let body = FailOn::new(Increment::new(1), [TaskId::new(2)]);
        let (unit, recorder, counter) = instrumented_unit(body);
        let composition = SerialComposition::new(specs(1, 3, 20), unit);

        let err = composition.execute(strategy, 0).await.unwrap_err();

        assert_eq!(err.failed_task(), Some(TaskId::new(2)), "strategy {}", strategy);
        assert_eq!(counter.calls_for(TaskId::new(3)), 0, "strategy {}", strategy);
        assert_eq!(recorder.phases_for(TaskId::new(2)), vec![Phase::Request, Phase::Error]);
        assert!(recorder.phases_for(TaskId::new(3)).is_empty());
    }
}

/// Test: The failure is reported to the sink with an error phase.
#[tokio::test(start_paused = true)]
async fn test_failure_is_visible_to_sink() {
    let body = FailOn::new(Increment::new(1), [TaskId::new(1)]);
    let (unit, recorder, _counter) = instrumented_unit(body);
    let composition = SerialComposition::new(specs(1, 2, 10), unit);

    let err = composition
        .execute(SerialStrategy::Async, 0)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("task 1 failed"));
    assert_eq!(recorder.count(Phase::Error), 1);
    assert_eq!(recorder.count(Phase::Response), 0);
}

/// Test: The callback driver releases the caller before the first task completes.
#[tokio::test(start_paused = true)]
async fn test_callback_driver_releases_caller() {
    let (unit, recorder, _counter) = instrumented_unit(Increment::new(1));
    let composition = SerialComposition::new(specs(1, 3, 100), unit);
    let (tx, rx) = oneshot::channel();

    let handle = composition.run_with_callback(10, move |result| {
        let _ = tx.send(result);
    });

    // Only the first request has been issued so far.
    assert_eq!(recorder.task_trace(), vec![(TaskId::new(1), Phase::Request)]);
    assert_eq!(handle.state(), RunState::Running);

    assert_eq!(rx.await.unwrap(), Ok(13));
    assert!(handle.is_finished());
}

/// Test: A blocking coroutine completes the whole chain before returning.
#[test]
fn test_blocking_coroutine_completes_synchronously() {
    let (unit, _recorder, _counter) = instrumented_unit(Increment::new(2));
    let composition = SerialComposition::new(specs(1, 3, 1), unit);
    let result = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&result);
    let handle = composition.run_coroutine(ThunkKind::Blocking, 0, move |outcome| {
        *sink.lock().unwrap() = Some(outcome);
    });

    assert_eq!(*result.lock().unwrap(), Some(Ok(6)));
    assert!(handle.is_finished());
}

/// Test: An empty chain hands back its input.
#[tokio::test(start_paused = true)]
async fn test_empty_chain_returns_input() {
    let (unit, recorder, _counter) = instrumented_unit(Increment::new(1));
    let composition = SerialComposition::new(specs(1, 0, 10), unit);

    assert!(composition.is_empty());
    assert_eq!(composition.run_blocking(9), Ok(9));
    assert_eq!(composition.execute(SerialStrategy::Coroutine, 9).await, Ok(9));
    assert!(recorder.events().iter().all(|event| event.task_id().is_none()));
}

/// Test: Cancelling a suspended chain stalls it and the handle reports which task.
#[tokio::test(start_paused = true)]
async fn test_cancel_stalls_suspended_chain() {
    let (unit, recorder, counter) = instrumented_unit(Increment::new(1));
    let composition = SerialComposition::new(specs(1, 3, 1_000), unit);
    let fired = Arc::new(Mutex::new(false));

    let flag = Arc::clone(&fired);
    let handle = composition.run_coroutine(ThunkKind::Suspending, 0, move |_| {
        *flag.lock().unwrap() = true;
    });

    // Let the first task finish, then cancel while the second is pending.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    handle.cancel();

    let state = wait_for_settled(&handle, Duration::from_secs(10)).await;

    assert_eq!(
        state,
        RunState::Stalled {
            cancelled: vec![TaskId::new(2)]
        }
    );
    assert!(!*fired.lock().unwrap());
    assert_eq!(counter.total(), 1);
    assert_eq!(
        recorder.phases_for(TaskId::new(2)),
        vec![Phase::Request, Phase::Cancelled]
    );
}

/// Test: Cancelling one run does not cancel later runs of the same composition.
#[tokio::test(start_paused = true)]
async fn test_run_cancellation_is_scoped() {
    let (unit, _recorder, _counter) = instrumented_unit(Increment::new(1));
    let composition = SerialComposition::new(specs(1, 2, 100), unit);

    let handle = composition.run_with_callback(0, |_| {});
    handle.cancel();
    wait_for_settled(&handle, Duration::from_secs(1)).await;

    assert_eq!(composition.execute(SerialStrategy::Callback, 0).await, Ok(2));
}

/// Test: Async façades report a cancelled composition as a stall.
#[tokio::test(start_paused = true)]
async fn test_cancelled_composition_reports_stall() {
    for strategy in SerialStrategy::ALL {
        let (unit, _recorder, _counter) = instrumented_unit(Increment::new(1));
        let composition = SerialComposition::new(specs(7, 2, 50), unit);
        composition.cancel();

        let err = composition.execute(strategy, 0).await.unwrap_err();

        assert_eq!(
            err,
            CompositionError::Stalled {
                cancelled: vec![TaskId::new(7)]
            },
            "strategy {}",
            strategy
        );
    }
}

/// Test: A long zero-latency chain stays in causal order under every strategy.
#[tokio::test(start_paused = true)]
async fn test_long_chain_under_every_strategy() {
    const TASKS: usize = 10_000;
    let ids: Vec<u32> = (1..=TASKS as u32).collect();

    for strategy in SerialStrategy::ALL {
        let (unit, recorder, counter) = instrumented_unit(Increment::new(1));
        let composition = SerialComposition::new(TaskSpec::sequence(1, TASKS, None), unit);

        let result = composition.execute(strategy, 0).await;

        assert_eq!(result, Ok(TASKS as i64), "strategy {}", strategy);
        assert_eq!(counter.total(), TASKS as u32, "strategy {}", strategy);
        assert_causal_chain(&recorder.task_trace(), &ids);
    }
}
