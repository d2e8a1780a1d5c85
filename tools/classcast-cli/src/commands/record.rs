//! Record the composite of real devices.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use classcast_capture_engine::backend::GstCaptureBackend;
use classcast_common::config::AppConfig;
use classcast_media_model::{MicrophoneDescriptor, ScreenTarget, SourceDescriptor};
use classcast_recorder::GstRecorderBackend;
use classcast_session::{LoggingSessionBackend, Platform, StartRequest, StreamController};

pub struct RecordOptions {
    pub session: String,
    pub output: PathBuf,
    pub cameras: Vec<String>,
    pub screen: bool,
    pub monitor: usize,
    pub mic: bool,
}

pub async fn run(config: AppConfig, options: RecordOptions) -> anyhow::Result<()> {
    if options.cameras.is_empty() && !options.screen {
        bail!("nothing to record: pass --camera <device> and/or --screen");
    }

    let mut request = StartRequest::new(options.session.as_str())
        .publish(false)
        .record(true);
    for camera in &options.cameras {
        request = request.with_source(SourceDescriptor::camera(camera.as_str()));
    }
    if options.screen {
        request = request.with_source(SourceDescriptor::screen(ScreenTarget::Monitor {
            index: options.monitor,
        }));
    }
    if options.mic {
        request = request.with_microphone(MicrophoneDescriptor::default());
    }

    println!("Starting recording session: {}", options.session);
    println!("  Output: {}", options.output.display());
    println!("  Cameras: {:?}", options.cameras);
    println!("  Screen: {}", options.screen);
    println!("  Mic: {}", options.mic);
    println!();

    let controller = StreamController::new(
        Platform {
            capture: Arc::new(GstCaptureBackend::new()),
            recorder: Arc::new(GstRecorderBackend::new()),
            backend: Arc::new(LoggingSessionBackend),
            publish: None,
        },
        config,
    );
    let printer = super::print_status(&controller);
    controller.start(request).await?;

    println!("Press Ctrl+C to stop recording...");
    tokio::signal::ctrl_c().await?;
    println!();

    let summary = controller
        .stop()
        .await
        .context("the session ended before it could be stopped")?;
    printer.abort();

    match summary.recording {
        Some(Ok(recording)) => {
            std::fs::create_dir_all(&options.output)?;
            let path = options
                .output
                .join(format!("{}.{}", options.session, recording.file_extension()));
            std::fs::write(&path, &recording.data)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Recording saved to: {}", path.display());
            if recording.truncated {
                println!("[WARN] The recording buffer overflowed; the start is missing.");
            }
            Ok(())
        }
        Some(Err(e)) => Err(e.into()),
        None => bail!("no recording was produced"),
    }
}
