//! In-memory recorder backend.
//!
//! Produces a deterministic byte stream sized by the number of frames seen,
//! so tests can reason about recording sizes without a real encoder.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::MediaStream;
use classcast_recorder::{RecorderBackend, RecorderControl, RecorderSession};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const DEFAULT_BYTES_PER_FRAME: usize = 256;

pub struct MemoryRecorderBackend {
    supported: Vec<String>,
    bytes_per_frame: usize,
    stall: Arc<AtomicBool>,
    starts: AtomicUsize,
    last_stream: Mutex<Option<MediaStream>>,
}

impl MemoryRecorderBackend {
    /// Supports every WebM and MP4 type.
    pub fn new() -> Self {
        Self::supporting(&["video/webm;codecs=vp8,opus", "video/webm", "video/mp4"])
    }

    pub fn supporting(types: &[&str]) -> Self {
        Self {
            supported: types.iter().map(|t| t.to_string()).collect(),
            bytes_per_frame: DEFAULT_BYTES_PER_FRAME,
            stall: Arc::new(AtomicBool::new(false)),
            starts: AtomicUsize::new(0),
            last_stream: Mutex::new(None),
        }
    }

    pub fn with_bytes_per_frame(mut self, bytes: usize) -> Self {
        self.bytes_per_frame = bytes;
        self
    }

    /// Ignore graceful stop requests, so only a forced stop ends a recording.
    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// The stream handed to the most recent start.
    pub fn last_stream(&self) -> Option<MediaStream> {
        self.last_stream.lock().clone()
    }
}

impl Default for MemoryRecorderBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryControl {
    stop_requested: watch::Sender<bool>,
    stopped: Arc<watch::Sender<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
    stall: Arc<AtomicBool>,
}

impl RecorderControl for MemoryControl {
    fn request_stop(&self) {
        if self.stall.load(Ordering::SeqCst) {
            tracing::debug!("Simulated recorder ignoring stop request");
            return;
        }
        self.stop_requested.send_replace(true);
    }

    fn force_stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.stopped.send_replace(true);
    }
}

#[async_trait::async_trait]
impl RecorderBackend for MemoryRecorderBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|t| t == mime_type)
    }

    async fn start(
        &self,
        stream: &MediaStream,
        mime_type: &str,
        timeslice: Duration,
    ) -> CastResult<RecorderSession> {
        let video = stream
            .first_video()
            .cloned()
            .ok_or_else(|| CastError::recorder("stream has no video track"))?;
        let mut frames = video
            .subscribe_frames()
            .ok_or_else(|| CastError::recorder("video track carries no frames"))?;
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.last_stream.lock() = Some(stream.clone());

        let (tx, chunks) = mpsc::unbounded_channel();
        let (stopped_tx, stopped) = watch::channel(false);
        let stopped_tx = Arc::new(stopped_tx);
        let (stop_requested, mut stop_rx) = watch::channel(false);
        let bytes_per_frame = self.bytes_per_frame;

        let mut pending = format!("SIMREC {mime_type}\n").into_bytes();
        let done = stopped_tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timeslice);
            ticker.tick().await;
            let mut seen: u64 = 0;
            loop {
                tokio::select! {
                    changed = frames.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        pending.extend(std::iter::repeat((seen % 251) as u8).take(bytes_per_frame));
                        seen += 1;
                    }
                    _ = ticker.tick() => {
                        if !pending.is_empty() && tx.send(std::mem::take(&mut pending)).is_err() {
                            break;
                        }
                    }
                    _ = stop_rx.wait_for(|requested| *requested) => break,
                }
            }
            if !pending.is_empty() {
                let _ = tx.send(pending);
            }
            done.send_replace(true);
        });

        Ok(RecorderSession {
            chunks,
            stopped,
            control: Arc::new(MemoryControl {
                stop_requested,
                stopped: stopped_tx,
                task: Mutex::new(Some(task)),
                stall: self.stall.clone(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use classcast_common::config::RecorderConfig;
    use classcast_platform_core::{MediaTrack, VideoFrame};
    use classcast_recorder::LocalRecorder;

    use super::*;

    fn config() -> RecorderConfig {
        RecorderConfig {
            timeslice_ms: 20,
            force_stop_timeout_ms: 100,
            trailing_wait_ms: 50,
            ..RecorderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_recording_grows_with_frames() {
        let backend = MemoryRecorderBackend::new();
        let video = MediaTrack::new_video("composite");
        let stream = MediaStream::from_tracks([video.clone()]);
        let recorder = LocalRecorder::start(&backend, &stream, &config()).await.unwrap();

        for i in 0..8 {
            video.push_frame(VideoFrame::solid(4, 4, [0, 0, 0, 255], i));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let recording = recorder.stop().await.unwrap();
        assert!(!recording.forced_stop);
        assert!(recording.size() > 8 * DEFAULT_BYTES_PER_FRAME / 2);
        assert!(recording.data.starts_with(b"SIMREC video/webm;codecs=vp8,opus"));
    }

    #[tokio::test]
    async fn test_stalled_recorder_needs_forced_stop() {
        let backend = MemoryRecorderBackend::new();
        backend.set_stall(true);
        let video = MediaTrack::new_video("composite");
        let stream = MediaStream::from_tracks([video.clone()]);
        let recorder = LocalRecorder::start(&backend, &stream, &config()).await.unwrap();

        for i in 0..6 {
            video.push_frame(VideoFrame::solid(4, 4, [0, 0, 0, 255], i));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        let recording = recorder.stop().await.unwrap();
        assert!(recording.forced_stop);
        assert!(recording.size() >= 1000);
    }
}
