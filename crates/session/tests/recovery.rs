mod common;

use std::time::Duration;

use classcast_common::error::AcquisitionCause;
use classcast_media_model::{MicrophoneDescriptor, StreamStatus};
use classcast_platform_core::TrackKind;
use classcast_publish::ConnectionState;
use classcast_platform_sim::{MemoryRecorderBackend, SimCaptureBackend, MICROPHONE_KEY};

use common::*;

#[tokio::test]
async fn test_ended_camera_is_replaced_without_restart() {
    let h = Harness::new();
    let state = h.controller.start(camera_request("narrow")).await.unwrap();
    let transport = h.engine.current().unwrap();

    assert_eq!(h.capture.end_source("camera:cam0"), 1);
    wait_until("camera reacquired", || h.capture.open_count("camera:cam0") == 2).await;
    wait_for_status(&h.controller, StreamStatus::Live).await;

    let after = h.controller.state().await.unwrap();
    assert_eq!(after.restarts, 0);
    assert_eq!(after.composite_track, state.composite_track);
    assert_eq!(h.engine.transports().len(), 1);
    assert_eq!(h.router.producers().len(), 1);
    assert_eq!(h.capture.live_tracks("camera:cam0").len(), 1);

    // The same video sender keeps carrying composite frames.
    let frames = |t: &classcast_platform_sim::rtc::LoopbackTransport| {
        t.sender_stats()
            .iter()
            .find(|s| s.kind == TrackKind::Video)
            .map(|s| s.frames)
            .unwrap_or(0)
    };
    let before = frames(&transport);
    wait_until("composite keeps flowing", || frames(&transport) > before + 3).await;

    h.controller.stop().await.unwrap();
    assert!(h.capture.live_tracks("camera:cam0").is_empty());
}

#[tokio::test]
async fn test_failed_replacement_escalates_to_full_restart() {
    let h = Harness::new();
    h.controller.start(camera_request("escalate")).await.unwrap();

    h.capture.fail_always("camera:cam0", AcquisitionCause::DeviceNotFound);
    h.capture.end_source("camera:cam0");
    wait_for_status(&h.controller, StreamStatus::Retrying).await;
    h.capture.clear_failures("camera:cam0");

    wait_for_status(&h.controller, StreamStatus::Live).await;
    let state = h.controller.state().await.unwrap();
    assert_eq!(state.restarts, 1);
    assert_eq!(state.session_id, "escalate");
    assert_eq!(h.engine.transports().len(), 2);
    assert!(h.engine.transports()[0].is_closed());
    assert_eq!(h.backend.starts().len(), 2);

    h.controller.stop().await.unwrap();
    assert!(h.capture.live_tracks("camera:cam0").is_empty());
}

#[tokio::test]
async fn test_restart_that_fails_again_leaves_session_failed() {
    let h = Harness::new();
    h.controller.start(camera_request("doomed")).await.unwrap();

    h.capture.fail_always("camera:cam0", AcquisitionCause::DeviceNotFound);
    h.capture.end_source("camera:cam0");

    let mut status = h.controller.subscribe_status();
    let failed = tokio::time::timeout(
        WAIT,
        status.wait_for(|s| matches!(s, StreamStatus::Failed(_))),
    )
    .await;
    assert!(failed.is_ok());
    assert!(!h.controller.is_active().await);
    assert_eq!(h.backend.stops(), vec!["doomed".to_string()]);
    assert!(h.controller.stop().await.is_none());
}

#[tokio::test]
async fn test_lost_connection_restarts_the_session() {
    let h = Harness::new();
    h.controller.start(camera_request("flaky")).await.unwrap();

    assert!(h.engine.set_connection_state(ConnectionState::Failed));
    wait_for_status(&h.controller, StreamStatus::Retrying).await;
    wait_for_status(&h.controller, StreamStatus::Live).await;

    assert_eq!(h.controller.state().await.unwrap().restarts, 1);
    assert_eq!(h.router.connect_count(), 2);
    assert_eq!(h.capture.open_count("camera:cam0"), 2);
    assert_eq!(h.capture.live_tracks("camera:cam0").len(), 1);

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_during_restart_delay_prevents_restart() {
    let mut config = test_config();
    config.publish.restart_delay_ms = 400;
    let h = Harness::build(SimCaptureBackend::new(), MemoryRecorderBackend::new(), config);
    h.controller.start(camera_request("leaving")).await.unwrap();

    h.engine.set_connection_state(ConnectionState::Disconnected);
    wait_for_status(&h.controller, StreamStatus::Retrying).await;
    h.controller.stop().await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.controller.status(), StreamStatus::Stopped);
    assert!(!h.controller.is_active().await);
    assert_eq!(h.engine.transports().len(), 1);
    assert_eq!(h.capture.open_count("camera:cam0"), 1);
}

#[tokio::test]
async fn test_ended_microphone_is_rewired_into_the_same_mix() {
    let h = Harness::build(
        SimCaptureBackend::new().without_screen_audio(),
        MemoryRecorderBackend::new(),
        test_config(),
    );
    let state = h
        .controller
        .start(camera_request("mic").with_microphone(MicrophoneDescriptor::default()))
        .await
        .unwrap();
    assert_eq!(state.producers.len(), 2);

    let transport = h.engine.current().unwrap();
    let audio_sender = |t: &classcast_platform_sim::rtc::LoopbackTransport| {
        t.sender_stats()
            .into_iter()
            .find(|s| s.kind == TrackKind::Audio)
            .map(|s| s.track_id)
    };
    let sent = audio_sender(&transport).unwrap();
    let recorded = h
        .recorder
        .last_stream()
        .and_then(|s| s.first_audio().cloned())
        .unwrap();
    assert_eq!(recorded.id(), sent);

    h.capture.end_source(MICROPHONE_KEY);
    wait_until("microphone reacquired", || h.capture.open_count(MICROPHONE_KEY) == 2).await;
    wait_for_status(&h.controller, StreamStatus::Live).await;

    // Both consumers still read the original mixed track, now fed by the
    // new microphone.
    assert!(recorded.is_live());
    assert_eq!(audio_sender(&transport), Some(sent));
    let mut rx = recorded.subscribe_audio().unwrap();
    let heard = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(chunk) if chunk.peak() > 0.01 => return true,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(heard, "recorded mix carries the new microphone");

    let after = h.controller.state().await.unwrap();
    assert_eq!(after.restarts, 0);
    assert!(after.microphone);
    assert_eq!(h.router.producers().len(), 2);

    let summary = h.controller.stop().await.unwrap();
    assert!(summary.recording().is_some());
    assert!(h.capture.live_tracks(MICROPHONE_KEY).is_empty());
}

#[tokio::test]
async fn test_ended_screen_with_audio_is_reacquired_once() {
    let h = Harness::new();
    h.controller
        .start(camera_request("share").with_source(screen().with_audio()))
        .await
        .unwrap();
    assert_eq!(h.router.producers().len(), 2);

    assert_eq!(h.capture.end_source("screen"), 2);
    wait_until("screen reacquired", || h.capture.open_count("screen") == 2).await;
    wait_for_status(&h.controller, StreamStatus::Live).await;

    // Give the health scan time to report the old screen audio as well.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.capture.open_count("screen"), 2);
    assert_eq!(h.controller.state().await.unwrap().restarts, 0);
    assert_eq!(h.capture.live_tracks("screen").len(), 2);

    h.controller.stop().await.unwrap();
}
