#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use classcast_common::config::AppConfig;
use classcast_media_model::{ScreenTarget, SourceDescriptor, StreamStatus};
use classcast_platform_sim::{LoopbackEngine, MemoryRecorderBackend, SimCaptureBackend, SimRouter};
use classcast_session::{
    MemorySessionBackend, Platform, PublishTarget, StartRequest, StreamController,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub capture: Arc<SimCaptureBackend>,
    pub router: Arc<SimRouter>,
    pub engine: Arc<LoopbackEngine>,
    pub recorder: Arc<MemoryRecorderBackend>,
    pub backend: Arc<MemorySessionBackend>,
    pub controller: StreamController,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(SimCaptureBackend::new(), MemoryRecorderBackend::new(), test_config())
    }

    pub fn build(
        capture: SimCaptureBackend,
        recorder: MemoryRecorderBackend,
        config: AppConfig,
    ) -> Self {
        let capture = Arc::new(capture);
        let router = Arc::new(SimRouter::new());
        let engine = Arc::new(LoopbackEngine::new());
        let recorder = Arc::new(recorder);
        let backend = Arc::new(MemorySessionBackend::new());
        let controller = StreamController::new(
            Platform {
                capture: capture.clone(),
                recorder: recorder.clone(),
                backend: backend.clone(),
                publish: Some(PublishTarget {
                    signaling: router.clone(),
                    rtc: engine.clone(),
                }),
            },
            config,
        );
        Self {
            capture,
            router,
            engine,
            recorder,
            backend,
            controller,
        }
    }
}

/// Small canvas, fast ticks, short timeouts.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.compositor.canvas_width = 320;
    config.compositor.canvas_height = 180;
    config.compositor.target_fps = 30;
    config.publish.health_interval_ms = 25;
    config.publish.restart_delay_ms = 150;
    config.recorder.timeslice_ms = 30;
    config.recorder.trailing_wait_ms = 40;
    config.recorder.force_stop_timeout_ms = 200;
    config.recorder.min_blob_bytes = 100;
    config.capture.busy_retry_delay_ms = 10;
    config
}

pub fn camera_request(session_id: &str) -> StartRequest {
    StartRequest::new(session_id).with_source(SourceDescriptor::camera("cam0"))
}

pub fn screen() -> SourceDescriptor {
    SourceDescriptor::screen(ScreenTarget::default())
}

pub async fn wait_for_status(controller: &StreamController, expected: StreamStatus) {
    let mut rx = controller.subscribe_status();
    let reached = tokio::time::timeout(WAIT, rx.wait_for(|s| *s == expected))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    assert!(
        reached,
        "timed out waiting for '{expected}', status is '{}'",
        controller.status()
    );
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
