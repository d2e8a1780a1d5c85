//! Run a complete session against synthetic devices.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use classcast_common::config::AppConfig;
use classcast_media_model::{
    LayoutType, MicrophoneDescriptor, ScreenTarget, SourceDescriptor, SourceId,
};
use classcast_platform_sim::{LoopbackEngine, MemoryRecorderBackend, SimCaptureBackend, SimRouter};
use classcast_session::{
    LoggingSessionBackend, Platform, PublishTarget, StartRequest, StreamController,
};

pub struct SimulateOptions {
    pub session: String,
    pub seconds: f64,
    pub cameras: usize,
    pub screen: bool,
    pub mic: bool,
    pub record: bool,
    pub layout: LayoutType,
    pub end_camera_after: Option<f64>,
    pub output: Option<PathBuf>,
}

pub async fn run(config: AppConfig, options: SimulateOptions) -> anyhow::Result<()> {
    if options.cameras > 2 {
        bail!("the synthetic platform has two cameras");
    }
    if options.cameras == 0 && !options.screen {
        bail!("nothing to show: add --cameras or --screen");
    }

    let capture = Arc::new(SimCaptureBackend::new());
    let router = Arc::new(SimRouter::new());
    let engine = Arc::new(LoopbackEngine::new());
    let controller = StreamController::new(
        Platform {
            capture: capture.clone(),
            recorder: Arc::new(MemoryRecorderBackend::new()),
            backend: Arc::new(LoggingSessionBackend),
            publish: Some(PublishTarget {
                signaling: Arc::new(router.json_line_client()),
                rtc: engine.clone(),
            }),
        },
        config,
    );

    let mut request = StartRequest::new(options.session.as_str())
        .with_layout(options.layout)
        .record(options.record);
    for index in 0..options.cameras {
        request = request.with_source(SourceDescriptor::camera(format!("cam{index}")));
    }
    if options.screen {
        request =
            request.with_source(SourceDescriptor::screen(ScreenTarget::default()).with_audio());
    }
    if options.mic {
        request = request.with_microphone(MicrophoneDescriptor::default());
    }

    println!("Starting simulated session: {}", options.session);
    let printer = super::print_status(&controller);
    let state = controller.start(request).await?;
    println!("  Sources: {:?}", state.sources);
    println!("  Producers: {}", state.producers.join(", "));
    if let Some(mime) = &state.recording_mime {
        println!("  Recording: {mime}");
    }
    for warning in &state.warnings {
        println!("  [WARN] {warning}");
    }
    println!();

    let total = Duration::from_secs_f64(options.seconds.max(0.0));
    let mut waited = Duration::ZERO;
    if let Some(after) = options.end_camera_after.filter(|_| options.cameras > 0) {
        let after = Duration::from_secs_f64(after.max(0.0)).min(total);
        tokio::time::sleep(after).await;
        waited = after;
        let ended = capture.end_source(SourceId::camera("cam0").as_str());
        println!("Simulated loss of camera cam0 ({ended} track(s) ended)");
    }
    tokio::time::sleep(total.saturating_sub(waited)).await;

    if let Some(stats) = controller.compositor_stats().await {
        println!(
            "Compositor: {} ticks, {} frames, layout v{}",
            stats.ticks, stats.frames_emitted, stats.layout_version
        );
    }
    if let Some(transport) = engine.current() {
        for sender in transport.sender_stats() {
            println!(
                "  {} sender {}: {} frames, {} audio chunks",
                sender.kind, sender.local_id, sender.frames, sender.audio_chunks
            );
        }
    }

    let summary = controller
        .stop()
        .await
        .context("the session ended before it could be stopped")?;
    printer.abort();

    println!();
    println!(
        "Session {} ran for {:.1}s with {} restart(s)",
        summary.state.session_id,
        summary.duration.as_secs_f64(),
        summary.state.restarts
    );
    match &summary.recording {
        Some(Ok(recording)) => {
            println!(
                "Recording: {} bytes in {} chunks{}",
                recording.size(),
                recording.chunk_count,
                if recording.forced_stop { " (forced stop)" } else { "" }
            );
            if let Some(path) = &options.output {
                std::fs::write(path, &recording.data)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Recording saved to: {}", path.display());
            }
        }
        Some(Err(e)) => println!("Recording failed: {e}"),
        None => {}
    }
    Ok(())
}
