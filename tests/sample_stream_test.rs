//! Capture cycle and sample delivery over a live socket.

mod common;

use common::{is_closed, read_samples, receives_more, start, wait_until};
use picoscpi::hardware::driver::ScopeStatus;
use picoscpi::hardware::mock::MockScope;
use picoscpi::ServerError;
use std::time::Duration;

const SAMPLES: usize = 10_000;

#[tokio::test]
async fn test_data_client_receives_one_full_capture() {
    let harness = start(MockScope::new().with_sample_count(SAMPLES)).await;
    let mut data = harness.connect_data().await;

    assert!(wait_until(|| harness.scope.has_pending_capture()).await);
    assert_eq!(harness.start_captures(), 1);
    harness
        .scope
        .fire_completion(ScopeStatus::OK)
        .unwrap()
        .join()
        .unwrap();

    let bytes = read_samples(&mut data, SAMPLES * 2).await;
    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    assert_eq!(samples.len(), SAMPLES);
    // Synthetic square wave starts on its high half
    assert!(samples[0] > 0);

    // The next capture is armed but nothing more is sent until it completes
    assert!(wait_until(|| harness.start_captures() == 2).await);
    assert!(!receives_more(&mut data, Duration::from_millis(100)).await);
    assert_eq!(harness.fetches(), 1);

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_consecutive_captures_stream_back_to_back() {
    let harness = start(MockScope::new().with_sample_count(256)).await;
    let mut data = harness.connect_data().await;

    for round in 1..=3 {
        assert!(wait_until(|| harness.scope.has_pending_capture()).await);
        harness
            .scope
            .fire_completion(ScopeStatus::OK)
            .unwrap()
            .join()
            .unwrap();
        read_samples(&mut data, 512).await;
        assert_eq!(harness.fetches(), round);
    }

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_mid_capture_does_not_rearm() {
    let harness = start(MockScope::new().with_sample_count(SAMPLES)).await;
    let mut first = harness.connect_data().await;
    assert!(wait_until(|| harness.scope.has_pending_capture()).await);

    let mut second = harness.connect_data().await;
    assert!(is_closed(&mut first).await);
    assert_eq!(harness.start_captures(), 1);

    harness
        .scope
        .fire_completion(ScopeStatus::OK)
        .unwrap()
        .join()
        .unwrap();
    read_samples(&mut second, SAMPLES * 2).await;

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_data_client_leaving_mid_capture_is_tolerated() {
    let harness = start(MockScope::new().with_sample_count(64)).await;
    let data = harness.connect_data().await;
    assert!(wait_until(|| harness.scope.has_pending_capture()).await);

    drop(data);
    harness
        .scope
        .fire_completion(ScopeStatus::OK)
        .unwrap()
        .join()
        .unwrap();
    assert!(wait_until(|| harness.fetches() == 1).await);

    // A fresh client starts the cycle again
    let mut next = harness.connect_data().await;
    assert!(wait_until(|| harness.scope.has_pending_capture()).await);
    harness
        .scope
        .fire_completion(ScopeStatus::OK)
        .unwrap()
        .join()
        .unwrap();
    read_samples(&mut next, 128).await;

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_completion_stops_server() {
    let harness = start(MockScope::new().with_sample_count(SAMPLES)).await;
    let mut control = harness.connect_control().await;
    let mut data = harness.connect_data().await;
    assert!(wait_until(|| harness.scope.has_pending_capture()).await);

    harness
        .scope
        .fire_completion(ScopeStatus::DRIVER_FUNCTION)
        .unwrap()
        .join()
        .unwrap();

    assert!(is_closed(&mut data).await);
    assert!(is_closed(&mut control).await);
    assert_eq!(harness.fetches(), 0);

    let result = harness.stop().await;
    assert!(matches!(
        result,
        Err(ServerError::Hardware(e)) if e.status == ScopeStatus::DRIVER_FUNCTION
    ));
}

#[tokio::test]
async fn test_failed_start_stops_server() {
    let scope = MockScope::new();
    scope.fail_operation("start_capture", ScopeStatus::DRIVER_FUNCTION);
    let harness = start(scope).await;
    let mut data = harness.connect_data().await;

    assert!(is_closed(&mut data).await);
    assert!(matches!(harness.stop().await, Err(ServerError::Hardware(_))));
}

#[tokio::test]
async fn test_commands_are_served_while_capture_runs() {
    let harness = start(MockScope::new().with_sample_count(SAMPLES)).await;
    let _data = harness.connect_data().await;
    assert!(wait_until(|| harness.scope.has_pending_capture()).await);

    let mut control = harness.connect_control().await;
    let reply = common::query_identity(&mut control).await;
    assert!(reply.ends_with('\n'));
    assert!(harness.scope.has_pending_capture());

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_automatic_capture_failure_stops_server() {
    let scope = MockScope::automatic(Duration::from_millis(10)).with_sample_count(SAMPLES);
    scope.set_completion_status(ScopeStatus::DRIVER_FUNCTION);
    let harness = start(scope).await;
    let mut data = harness.connect_data().await;

    assert!(is_closed(&mut data).await);
    assert_eq!(harness.start_captures(), 1);
    assert_eq!(harness.fetches(), 0);
    assert!(matches!(
        harness.stop().await,
        Err(ServerError::Hardware(e)) if e.status == ScopeStatus::DRIVER_FUNCTION
    ));
}
