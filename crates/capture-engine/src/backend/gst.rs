//! GStreamer capture backend.
//!
//! Every capture is a small pipeline ending in an `appsink`; decoded
//! buffers are pushed into a [`MediaTrack`]. Stopping the track shuts the
//! pipeline down, and an EOS or error on the bus ends the track.

use std::sync::OnceLock;
use std::time::Duration;

use classcast_common::clock::RateController;
use classcast_common::error::{AcquisitionCause, CastError, CastResult};
use classcast_media_model::{CaptureConstraints, DeviceInfo, DeviceKind, ScreenTarget};
use classcast_platform_core::{
    AudioChunk, MediaStream, MediaTrack, VideoFrame, CHANNELS, SAMPLE_RATE,
};
use gst::glib;
use gst::prelude::*;
use gstreamer as gst;
use parking_lot::Mutex;

use crate::backend::CaptureBackend;

/// How long a pipeline may take to reach `Playing`.
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Capture backend built on GStreamer sources (`v4l2src`, `ximagesrc`, `pulsesrc`).
#[derive(Debug, Default)]
pub struct GstCaptureBackend;

impl GstCaptureBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl CaptureBackend for GstCaptureBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    async fn list_devices(&self) -> CastResult<Vec<DeviceInfo>> {
        tokio::task::spawn_blocking(enumerate_devices)
            .await
            .map_err(|e| CastError::Other(e.into()))?
    }

    async fn open_camera(
        &self,
        device_id: &str,
        constraints: &CaptureConstraints,
    ) -> CastResult<MediaStream> {
        let launch = camera_launch(device_id, constraints);
        let constraints = *constraints;
        let label = format!("camera {device_id}");
        let track = tokio::task::spawn_blocking(move || {
            start_video_capture(&label, &launch, constraints.effective_frame_rate())
        })
        .await
        .map_err(|e| CastError::Other(e.into()))??;
        Ok(MediaStream::from_tracks([track]))
    }

    async fn open_screen(
        &self,
        target: &ScreenTarget,
        constraints: &CaptureConstraints,
        with_audio: bool,
    ) -> CastResult<MediaStream> {
        let launch = screen_launch(target, constraints);
        let fps = constraints.effective_frame_rate();
        let video = tokio::task::spawn_blocking(move || start_video_capture("screen", &launch, fps))
            .await
            .map_err(|e| CastError::Other(e.into()))??;

        let mut stream = MediaStream::from_tracks([video]);
        if with_audio {
            // Screen audio is best effort: the monitor source may not exist.
            let launch = audio_launch("pulsesrc device=@DEFAULT_MONITOR@");
            match tokio::task::spawn_blocking(move || start_audio_capture("screen audio", &launch))
                .await
                .map_err(|e| CastError::Other(e.into()))?
            {
                Ok(audio) => stream.add_track(audio),
                Err(e) => tracing::warn!(error = %e, "Screen audio unavailable"),
            }
        }
        Ok(stream)
    }

    async fn open_microphone(&self, device_id: Option<&str>) -> CastResult<MediaTrack> {
        let source = match device_id {
            Some(id) => format!("pulsesrc device=\"{}\"", escape(id)),
            None => "pulsesrc".to_string(),
        };
        let launch = audio_launch(&source);
        tokio::task::spawn_blocking(move || start_audio_capture("microphone", &launch))
            .await
            .map_err(|e| CastError::Other(e.into()))?
    }
}

fn video_caps(constraints: &CaptureConstraints) -> String {
    let mut caps = format!(
        "video/x-raw,format=RGBA,framerate={}/1",
        constraints.effective_frame_rate()
    );
    if let (Some(w), Some(h)) = (constraints.ideal_width, constraints.ideal_height) {
        caps.push_str(&format!(",width={w},height={h}"));
    }
    caps
}

fn camera_launch(device_id: &str, constraints: &CaptureConstraints) -> String {
    format!(
        "v4l2src device=\"{}\" do-timestamp=true ! videoconvert ! videoscale ! videorate ! {} ! appsink name=sink emit-signals=true max-buffers=2 drop=true sync=false",
        escape(device_id),
        video_caps(constraints)
    )
}

fn screen_launch(target: &ScreenTarget, constraints: &CaptureConstraints) -> String {
    let source = match target {
        ScreenTarget::Monitor { .. } => "ximagesrc use-damage=false show-pointer=true".to_string(),
        ScreenTarget::Window { id } | ScreenTarget::Tab { id } => {
            format!("ximagesrc use-damage=false show-pointer=true xid={}", escape(id))
        }
    };
    format!(
        "{source} ! queue max-size-buffers=4 leaky=downstream ! videoconvert ! videoscale ! videorate ! {} ! appsink name=sink emit-signals=true max-buffers=2 drop=true sync=false",
        video_caps(constraints)
    )
}

fn audio_launch(source: &str) -> String {
    format!(
        "{source} do-timestamp=true ! audioconvert ! audioresample ! audio/x-raw,format=F32LE,layout=interleaved,rate={SAMPLE_RATE},channels={CHANNELS} ! appsink name=sink emit-signals=true max-buffers=16 sync=false"
    )
}

fn init_gstreamer() -> CastResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(CastError::acquisition(
            AcquisitionCause::Other,
            format!("Failed to initialize GStreamer: {e}"),
        )),
    }
}

/// Whether a GStreamer element factory is installed.
pub fn has_element(name: &str) -> bool {
    init_gstreamer().is_ok() && gst::ElementFactory::find(name).is_some()
}

fn build_pipeline(launch: &str) -> CastResult<(gst::Pipeline, gst::Element)> {
    init_gstreamer()?;
    let element = gst::parse::launch(launch).map_err(|e| {
        CastError::acquisition(AcquisitionCause::Other, format!("Failed to build pipeline: {e}"))
    })?;
    let pipeline = element.dynamic_cast::<gst::Pipeline>().map_err(|_| {
        CastError::acquisition(AcquisitionCause::Other, "Launch string did not produce a pipeline")
    })?;
    let sink = pipeline.by_name("sink").ok_or_else(|| {
        CastError::acquisition(AcquisitionCause::Other, "Pipeline has no appsink named 'sink'")
    })?;
    Ok((pipeline, sink))
}

/// Bring the pipeline to `Playing`, classifying any failure.
fn play(name: &str, pipeline: &gst::Pipeline) -> CastResult<()> {
    let started = pipeline.set_state(gst::State::Playing);
    let settled = pipeline.state(gst::ClockTime::from_nseconds(START_TIMEOUT.as_nanos() as u64));
    if started.is_ok() && settled.0.is_ok() {
        return Ok(());
    }

    let error = pipeline.bus().and_then(|bus| {
        bus.timed_pop_filtered(gst::ClockTime::ZERO, &[gst::MessageType::Error])
    });
    let _ = pipeline.set_state(gst::State::Null);

    match error.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Error(err)) => {
            let cause = classify(&err.error());
            tracing::warn!(
                pipeline = name,
                error = %err.error(),
                ?cause,
                "Capture failed to start"
            );
            Err(CastError::acquisition(cause, format!("{name}: {}", err.error())))
        }
        _ => Err(CastError::acquisition(
            AcquisitionCause::Other,
            format!("{name}: pipeline failed to reach Playing"),
        )),
    }
}

fn classify(error: &glib::Error) -> AcquisitionCause {
    if let Some(kind) = error.kind::<gst::ResourceError>() {
        return match kind {
            gst::ResourceError::NotAuthorized | gst::ResourceError::OpenRead => {
                AcquisitionCause::PermissionDenied
            }
            gst::ResourceError::NotFound => AcquisitionCause::DeviceNotFound,
            gst::ResourceError::Busy => AcquisitionCause::DeviceBusy,
            gst::ResourceError::Settings => AcquisitionCause::ConstraintsUnsatisfiable,
            _ => AcquisitionCause::Other,
        };
    }
    if error.kind::<gst::CoreError>() == Some(gst::CoreError::Negotiation)
        || error.kind::<gst::StreamError>() == Some(gst::StreamError::Format)
    {
        return AcquisitionCause::ConstraintsUnsatisfiable;
    }
    AcquisitionCause::Other
}

/// Wire pipeline shutdown to the track and the bus to track end.
fn bind_lifecycle(name: &str, pipeline: gst::Pipeline, track: &MediaTrack) {
    let stopping = pipeline.clone();
    track.on_stop(move || {
        let _ = stopping.set_state(gst::State::Null);
    });

    let Some(bus) = pipeline.bus() else {
        return;
    };
    let watched = track.clone();
    let name = name.to_string();
    std::thread::spawn(move || {
        while watched.is_live() {
            let Some(msg) = bus.timed_pop_filtered(
                gst::ClockTime::from_mseconds(250),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            ) else {
                continue;
            };
            match msg.view() {
                gst::MessageView::Error(err) => {
                    tracing::warn!(
                        pipeline = %name,
                        error = %err.error(),
                        "Capture error; ending track"
                    );
                }
                _ => tracing::info!(pipeline = %name, "Capture reached end of stream"),
            }
            watched.end();
        }
    });
}

fn start_video_capture(name: &str, launch: &str, fps: u32) -> CastResult<MediaTrack> {
    let (pipeline, sink) = build_pipeline(launch)?;
    let track = MediaTrack::new_video(name);
    let rate = Mutex::new(RateController::new(fps));

    let target = track.clone();
    sink.connect("new-sample", false, move |args| {
        let appsink = args[0].get::<gst::Element>().ok()?;
        let sample = appsink.emit_by_name::<Option<gst::Sample>>("pull-sample", &[])?;
        let flow = match video_frame_from_sample(&sample) {
            Some(frame) if rate.lock().should_tick(frame.timestamp_ns) => {
                if target.push_frame(frame) {
                    gst::FlowReturn::Ok
                } else {
                    gst::FlowReturn::Eos
                }
            }
            _ => gst::FlowReturn::Ok,
        };
        Some(flow.to_value())
    });

    play(name, &pipeline)?;
    bind_lifecycle(name, pipeline, &track);
    tracing::info!(pipeline = name, track = %track.id(), "Video capture started");
    Ok(track)
}

fn start_audio_capture(name: &str, launch: &str) -> CastResult<MediaTrack> {
    let (pipeline, sink) = build_pipeline(launch)?;
    let track = MediaTrack::new_audio(name);

    let target = track.clone();
    sink.connect("new-sample", false, move |args| {
        let appsink = args[0].get::<gst::Element>().ok()?;
        let sample = appsink.emit_by_name::<Option<gst::Sample>>("pull-sample", &[])?;
        let flow = match audio_chunk_from_sample(&sample) {
            Some(chunk) => {
                if target.push_audio(chunk) {
                    gst::FlowReturn::Ok
                } else {
                    gst::FlowReturn::Eos
                }
            }
            None => gst::FlowReturn::Ok,
        };
        Some(flow.to_value())
    });

    play(name, &pipeline)?;
    bind_lifecycle(name, pipeline, &track);
    tracing::info!(pipeline = name, track = %track.id(), "Audio capture started");
    Ok(track)
}

fn video_frame_from_sample(sample: &gst::Sample) -> Option<VideoFrame> {
    let caps = sample.caps()?;
    let structure = caps.structure(0)?;
    let width = structure.get::<i32>("width").ok()? as u32;
    let height = structure.get::<i32>("height").ok()? as u32;
    let buffer = sample.buffer()?;
    let timestamp_ns = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
    let map = buffer.map_readable().ok()?;
    let expected = width as usize * height as usize * 4;
    let data = map.as_slice().get(..expected)?.to_vec();
    VideoFrame::from_rgba(width, height, data, timestamp_ns)
}

fn audio_chunk_from_sample(sample: &gst::Sample) -> Option<AudioChunk> {
    let buffer = sample.buffer()?;
    let timestamp_ns = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
    let map = buffer.map_readable().ok()?;
    let samples = map
        .as_slice()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Some(AudioChunk::new(samples, SAMPLE_RATE, CHANNELS, timestamp_ns))
}

fn enumerate_devices() -> CastResult<Vec<DeviceInfo>> {
    init_gstreamer()?;
    let monitor = gst::DeviceMonitor::new();
    let _ = monitor.add_filter(Some("Video/Source"), None);
    let _ = monitor.add_filter(Some("Audio/Source"), None);
    monitor.start().map_err(|e| {
        CastError::acquisition(AcquisitionCause::Other, format!("Device monitor failed: {e}"))
    })?;

    let mut devices: Vec<DeviceInfo> = monitor
        .devices()
        .iter()
        .filter_map(|device| {
            let class = device.device_class();
            let kind = if class.contains("Video") {
                DeviceKind::Camera
            } else if class.contains("Audio") {
                DeviceKind::Microphone
            } else {
                return None;
            };
            let props = device.properties();
            let device_id = props
                .as_ref()
                .and_then(|p| {
                    ["api.v4l2.path", "device.path", "node.name"]
                        .iter()
                        .find_map(|key| p.get::<String>(*key).ok())
                })
                .unwrap_or_else(|| device.display_name().to_string());
            Some(DeviceInfo {
                device_id,
                label: device.display_name().to_string(),
                kind,
            })
        })
        .collect();
    monitor.stop();

    devices.push(DeviceInfo {
        device_id: "screen".to_string(),
        label: "Entire screen".to_string(),
        kind: DeviceKind::Screen,
    });
    Ok(devices)
}

fn escape(value: &str) -> String {
    value.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_launch_carries_constraints() {
        let launch = camera_launch("/dev/video0", &CaptureConstraints::ideal(1280, 720, 30));
        assert!(launch.starts_with("v4l2src device=\"/dev/video0\""));
        assert!(launch.contains("framerate=30/1,width=1280,height=720"));
        assert!(launch.ends_with("sync=false"));
    }

    #[test]
    fn test_relaxed_screen_launch_omits_resolution() {
        let constraints = CaptureConstraints::ideal(1280, 720, 15)
            .with_max_frame_rate(30)
            .relaxed();
        let launch = screen_launch(&ScreenTarget::Window { id: "0x42".into() }, &constraints);
        assert!(launch.contains("xid=0x42"));
        assert!(launch.contains("framerate=15/1"));
        assert!(!launch.contains("width="));
    }

    #[test]
    fn test_audio_launch_uses_pipeline_format() {
        let launch = audio_launch("pulsesrc");
        assert!(launch.contains("format=F32LE"));
        assert!(launch.contains("rate=48000,channels=2"));
    }

    #[test]
    fn test_device_ids_are_escaped() {
        assert_eq!(escape("a\"b"), "a\\\"b");
    }
}
