//! GStreamer recorder backend.
//!
//! The composite frames and mixed audio are pushed into `appsrc` elements,
//! encoded, muxed into a streamable container and pulled back out of an
//! `appsink` as timesliced chunks.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::{MediaStream, MediaTrack, VideoFrame, CHANNELS, SAMPLE_RATE};
use gst::prelude::*;
use gstreamer as gst;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backend::{RecorderBackend, RecorderControl, RecorderSession};

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Encoders and muxer for one container family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContainerProfile {
    video_encoder: &'static str,
    audio_encoder: &'static str,
    muxer: &'static str,
}

fn profile_for(mime_type: &str) -> Option<ContainerProfile> {
    let base = mime_type.split(';').next().unwrap_or_default().trim();
    match base {
        "video/webm" => Some(ContainerProfile {
            video_encoder: "vp8enc deadline=1 cpu-used=8",
            audio_encoder: "opusenc",
            muxer: "webmmux streamable=true",
        }),
        "video/mp4" => Some(ContainerProfile {
            video_encoder: "x264enc tune=zerolatency speed-preset=veryfast ! h264parse",
            audio_encoder: "avenc_aac",
            muxer: "mp4mux streamable=true fragment-duration=1000",
        }),
        _ => None,
    }
}

fn factory_name(fragment: &str) -> &str {
    fragment.split_whitespace().next().unwrap_or_default()
}

fn launch_string(profile: &ContainerProfile, width: u32, height: u32, with_audio: bool) -> String {
    let mut launch = format!(
        "appsrc name=video format=time is-live=true do-timestamp=true \
         caps=video/x-raw,format=RGBA,width={width},height={height},framerate=0/1 \
         ! videoconvert ! {} ! queue ! mux. ",
        profile.video_encoder
    );
    if with_audio {
        launch.push_str(&format!(
            "appsrc name=audio format=time is-live=true do-timestamp=true \
             caps=audio/x-raw,format=F32LE,layout=interleaved,rate={SAMPLE_RATE},channels={CHANNELS} \
             ! audioconvert ! {} ! queue ! mux. ",
            profile.audio_encoder
        ));
    }
    launch.push_str(&format!(
        "{} name=mux ! appsink name=sink emit-signals=true sync=false",
        profile.muxer
    ));
    launch
}

fn init_gstreamer() -> CastResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string())) {
        Ok(()) => Ok(()),
        Err(e) => Err(CastError::recorder(format!("Failed to initialize GStreamer: {e}"))),
    }
}

fn has_element(name: &str) -> bool {
    init_gstreamer().is_ok() && gst::ElementFactory::find(name).is_some()
}

#[derive(Debug, Default)]
pub struct GstRecorderBackend;

impl GstRecorderBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl RecorderBackend for GstRecorderBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        let Some(profile) = profile_for(mime_type) else {
            return false;
        };
        [profile.video_encoder, profile.audio_encoder, profile.muxer]
            .iter()
            .all(|fragment| has_element(factory_name(fragment)))
    }

    async fn start(
        &self,
        stream: &MediaStream,
        mime_type: &str,
        timeslice: Duration,
    ) -> CastResult<RecorderSession> {
        let profile = profile_for(mime_type)
            .ok_or_else(|| CastError::recorder(format!("no encoder profile for {mime_type}")))?;
        let video = stream
            .first_video()
            .cloned()
            .ok_or_else(|| CastError::recorder("stream has no video track"))?;
        let audio = stream.first_audio().cloned();

        let first = first_frame(&video).await?;
        init_gstreamer()?;
        let launch = launch_string(&profile, first.width(), first.height(), audio.is_some());
        tracing::debug!(launch = %launch, "Recorder pipeline");

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| CastError::recorder(format!("Failed to build recorder pipeline: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CastError::recorder("Launch string did not produce a pipeline"))?;
        let element = |name: &str| {
            pipeline
                .by_name(name)
                .ok_or_else(|| CastError::recorder(format!("recorder pipeline has no '{name}'")))
        };
        let sink = element("sink")?;
        let video_src = element("video")?;
        let audio_src = match audio {
            Some(_) => Some(element("audio")?),
            None => None,
        };

        let (tx, chunks) = mpsc::unbounded_channel();
        let (stopped_tx, stopped) = watch::channel(false);
        let output = Arc::new(ChunkOutput {
            tx: Mutex::new(Some(tx)),
            pending: Mutex::new(Pending {
                data: Vec::new(),
                last_flush: Instant::now(),
            }),
            timeslice,
            stopped: stopped_tx,
        });

        let collector = output.clone();
        sink.connect("new-sample", false, move |args| {
            let appsink = args[0].get::<gst::Element>().ok()?;
            let sample = appsink.emit_by_name::<Option<gst::Sample>>("pull-sample", &[])?;
            if let Some(buffer) = sample.buffer() {
                if let Ok(map) = buffer.map_readable() {
                    collector.append(map.as_slice());
                }
            }
            Some(gst::FlowReturn::Ok.to_value())
        });

        if pipeline.set_state(gst::State::Playing).is_err() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(CastError::recorder("recorder pipeline failed to start"));
        }

        let mut feeders = vec![tokio::spawn(feed_video(video, video_src.clone(), first))];
        let mut sources = vec![video_src];
        if let (Some(track), Some(src)) = (audio, audio_src) {
            feeders.push(tokio::spawn(feed_audio(track, src.clone())));
            sources.push(src);
        }

        watch_bus(pipeline.clone(), output.clone());
        tracing::info!(mime = mime_type, "GStreamer recorder started");

        Ok(RecorderSession {
            chunks,
            stopped,
            control: Arc::new(GstRecorderControl {
                pipeline,
                sources,
                feeders: Mutex::new(feeders),
                output,
            }),
        })
    }
}

async fn first_frame(track: &MediaTrack) -> CastResult<Arc<VideoFrame>> {
    if let Some(frame) = track.latest_frame() {
        return Ok(frame);
    }
    let mut frames = track
        .subscribe_frames()
        .ok_or_else(|| CastError::recorder("video track carries no frames"))?;
    let waited = tokio::time::timeout(FIRST_FRAME_TIMEOUT, frames.wait_for(Option::is_some)).await;
    match waited {
        Ok(Ok(frame)) => frame
            .clone()
            .ok_or_else(|| CastError::recorder("video track carries no frames")),
        _ => Err(CastError::recorder("no video frame arrived before recording")),
    }
}

struct Pending {
    data: Vec<u8>,
    last_flush: Instant,
}

/// Timesliced hand-off from the appsink to the recorder.
struct ChunkOutput {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    pending: Mutex<Pending>,
    timeslice: Duration,
    stopped: watch::Sender<bool>,
}

impl ChunkOutput {
    fn append(&self, bytes: &[u8]) {
        let mut pending = self.pending.lock();
        pending.data.extend_from_slice(bytes);
        if pending.last_flush.elapsed() >= self.timeslice {
            let chunk = std::mem::take(&mut pending.data);
            pending.last_flush = Instant::now();
            drop(pending);
            self.send(chunk);
        }
    }

    fn send(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(chunk);
        }
    }

    /// Flush the remainder, close the chunk channel and report stopped.
    fn finish(&self) {
        let rest = std::mem::take(&mut self.pending.lock().data);
        self.send(rest);
        self.tx.lock().take();
        self.stopped.send_replace(true);
    }
}

fn watch_bus(pipeline: gst::Pipeline, output: Arc<ChunkOutput>) {
    let Some(bus) = pipeline.bus() else {
        return;
    };
    std::thread::spawn(move || {
        while !*output.stopped.borrow() {
            let Some(msg) = bus.timed_pop_filtered(
                gst::ClockTime::from_mseconds(250),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            ) else {
                continue;
            };
            if let gst::MessageView::Error(err) = msg.view() {
                tracing::error!(error = %err.error(), "Recorder pipeline error");
            } else {
                tracing::debug!("Recorder pipeline drained");
            }
            output.finish();
        }
        let _ = pipeline.set_state(gst::State::Null);
    });
}

struct GstRecorderControl {
    pipeline: gst::Pipeline,
    sources: Vec<gst::Element>,
    feeders: Mutex<Vec<JoinHandle<()>>>,
    output: Arc<ChunkOutput>,
}

impl GstRecorderControl {
    fn stop_feeders(&self) {
        for feeder in self.feeders.lock().drain(..) {
            feeder.abort();
        }
    }
}

impl RecorderControl for GstRecorderControl {
    fn request_stop(&self) {
        self.stop_feeders();
        for src in &self.sources {
            let _ = src.emit_by_name::<gst::FlowReturn>("end-of-stream", &[]);
        }
    }

    fn force_stop(&self) {
        self.stop_feeders();
        let _ = self.pipeline.set_state(gst::State::Null);
        self.output.finish();
    }
}

fn push(src: &gst::Element, data: Vec<u8>) -> bool {
    let buffer = gst::Buffer::from_mut_slice(data);
    src.emit_by_name::<gst::FlowReturn>("push-buffer", &[&buffer]) == gst::FlowReturn::Ok
}

async fn feed_video(track: MediaTrack, src: gst::Element, first: Arc<VideoFrame>) {
    let Some(mut frames) = track.subscribe_frames() else {
        return;
    };
    let (width, height) = (first.width(), first.height());
    if !push(&src, first.image().as_raw().clone()) {
        return;
    }
    loop {
        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = frames.borrow_and_update().clone();
                let Some(frame) = frame else { continue };
                if frame.width() != width || frame.height() != height {
                    tracing::debug!(
                        width = frame.width(),
                        height = frame.height(),
                        "Skipping resized frame"
                    );
                    continue;
                }
                if !push(&src, frame.image().as_raw().clone()) {
                    break;
                }
            }
            _ = track.ended() => break,
        }
    }
}

async fn feed_audio(track: MediaTrack, src: gst::Element) {
    let Some(mut rx) = track.subscribe_audio() else {
        return;
    };
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(chunk) => {
                    let bytes = chunk.to_stereo().iter().flat_map(|s| s.to_le_bytes()).collect();
                    if !push(&src, bytes) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Recorder audio feed lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = track.ended() => break,
        }
    }
}
