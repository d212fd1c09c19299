//! Demo driver integration tests.
//!
//! These tests run catalog demos end to end and check the event stream.

use braid::events::Phase;
use braid::testing::RecordingHandler;
use braid::{
    BodyConfig, ChannelHandler, CompositionError, Demo, DemoConfig, DemoDriver, DemoError,
    DemoOutput, Event, EventBus, TaskId,
};
use std::sync::Arc;
use tokio::sync::mpsc;

fn deterministic_config() -> DemoConfig {
    DemoConfig {
        duration_ms: 50,
        tasks: 3,
        first_task_id: 2,
        initial_input: Some(1),
        body: BodyConfig::Increment { step: 1 },
        ..Default::default()
    }
}

/// Test: Every serial demo produces the same result for a deterministic body.
#[tokio::test(start_paused = true)]
async fn test_serial_demos_agree() {
    for demo in Demo::all().iter().filter(|d| d.topology() == braid::Topology::Serial) {
        let driver = DemoDriver::new(deterministic_config(), Arc::new(EventBus::new())).unwrap();

        let report = driver.run(*demo).await.unwrap();

        assert_eq!(report.output, DemoOutput::Serial(4), "demo {}", demo);
        assert_eq!(report.epilogue, Some(5), "demo {}", demo);
    }
}

/// Test: Every parallel demo produces the same ordered outputs.
#[tokio::test(start_paused = true)]
async fn test_parallel_demos_agree() {
    for demo in [Demo::ParallelCallback, Demo::ParallelGather] {
        let driver = DemoDriver::new(deterministic_config(), Arc::new(EventBus::new())).unwrap();

        let report = driver.run(demo).await.unwrap();

        assert_eq!(report.output, DemoOutput::Parallel(vec![2, 2, 2]), "demo {}", demo);
    }
}

/// Test: A serial demo emits composition events around the task events.
#[tokio::test(start_paused = true)]
async fn test_demo_event_stream() {
    let recorder = Arc::new(RecordingHandler::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let events = EventBus::with_handler(recorder.clone());
    events.register(Arc::new(ChannelHandler::new(tx)));
    let driver = DemoDriver::new(deterministic_config(), Arc::new(events)).unwrap();

    driver.run(Demo::SerialCoroutine).await.unwrap();

    let ids: Vec<u32> = recorder
        .task_trace()
        .into_iter()
        .filter(|(_, phase)| *phase == Phase::Request)
        .map(|(id, _)| id.get())
        .collect();
    // Composed tasks 2..=4, then the epilogue task 5.
    assert_eq!(ids, vec![2, 3, 4, 5]);

    let mut forwarded = Vec::new();
    while let Ok(event) = rx.try_recv() {
        forwarded.push(event);
    }
    assert_eq!(forwarded.len(), recorder.events().len());
    assert!(forwarded
        .iter()
        .any(|event| matches!(event, Event::CompositionFinished { success: true, .. })));
}

/// Test: A configured failure ends the demo with the failing task.
#[tokio::test(start_paused = true)]
async fn test_demo_failure_names_task() {
    let config = DemoConfig {
        fail_tasks: vec![4],
        ..deterministic_config()
    };
    let driver = DemoDriver::new(config, Arc::new(EventBus::new())).unwrap();

    let err = driver.run(Demo::SerialBlocking).await.unwrap_err();

    match err {
        DemoError::Composition(CompositionError::TaskFailed(failure)) => {
            assert_eq!(failure.task_id, TaskId::new(4));
        }
        other => panic!("expected task failure, got {:?}", other),
    }
}

/// Test: A driver can be reused once a run has finished.
#[tokio::test(start_paused = true)]
async fn test_driver_is_reusable() {
    let driver = DemoDriver::new(deterministic_config(), Arc::new(EventBus::new())).unwrap();

    driver.run(Demo::SerialAsync).await.unwrap();
    assert!(!driver.is_running());
    driver.run(Demo::ParallelGather).await.unwrap();
}

/// Test: Arithmetic overflow in a valid config fails the demo at the overflowing task.
#[tokio::test(start_paused = true)]
async fn test_overflow_fails_the_overflowing_task() {
    let config = braid::YamlLoader::parse_config(
        "initial_input: 100\nduration_ms: 0\ntasks: 10\nbody: {type: multiply, factor: 1000}",
    )
    .unwrap();

    for demo in Demo::all().iter().filter(|d| d.topology() == braid::Topology::Serial) {
        let driver = DemoDriver::new(config.clone(), Arc::new(EventBus::new())).unwrap();

        let err = driver.run(*demo).await.unwrap_err();

        // 100 * 1000^6 exceeds i64::MAX; the sixth task has id 7.
        match err {
            DemoError::Composition(CompositionError::TaskFailed(failure)) => {
                assert_eq!(failure.task_id, TaskId::new(7), "demo {}", demo);
                assert!(failure.to_string().contains("overflow"));
            }
            other => panic!("expected task failure, got {:?}", other),
        }
        assert!(!driver.is_running());
    }
}
