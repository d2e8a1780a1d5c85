//! Media tracks and streams.
//!
//! A [`MediaTrack`] is a cheap, cloneable handle. All clones observe the same
//! state: frames pushed by the producing side are visible to every reader,
//! and ending the track through any clone ends it for all of them. The
//! release hook registered by the backend runs exactly once, no matter how
//! many times or from how many places the track is stopped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::frame::{AudioChunk, VideoFrame};

/// Buffered audio chunks per subscriber before the oldest are dropped.
const AUDIO_CHANNEL_CAPACITY: usize = 256;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Lifecycle state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// Why a track ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The owner stopped it.
    Stopped,
    /// The device or platform terminated it.
    SourceEnded,
}

type StopHook = Box<dyn FnOnce() + Send>;

enum Payload {
    Video(watch::Sender<Option<Arc<VideoFrame>>>),
    Audio(broadcast::Sender<AudioChunk>),
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    state: watch::Sender<TrackState>,
    end_reason: Mutex<Option<EndReason>>,
    stop_hook: Mutex<Option<StopHook>>,
    payload: Payload,
}

/// Handle to one live audio or video track.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}

impl MediaTrack {
    /// Create a live video track.
    pub fn new_video(label: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(None);
        Self::with_payload(TrackKind::Video, label.into(), Payload::Video(tx))
    }

    /// Create a live audio track.
    pub fn new_audio(label: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(AUDIO_CHANNEL_CAPACITY);
        Self::with_payload(TrackKind::Audio, label.into(), Payload::Audio(tx))
    }

    fn with_payload(kind: TrackKind, label: String, payload: Payload) -> Self {
        let n = NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed);
        let (state, _) = watch::channel(TrackState::Live);
        Self {
            inner: Arc::new(TrackInner {
                id: format!("{kind}-{n}"),
                kind,
                label,
                state,
                end_reason: Mutex::new(None),
                stop_hook: Mutex::new(None),
                payload,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn state(&self) -> TrackState {
        *self.inner.state.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state() == TrackState::Live
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        *self.inner.end_reason.lock()
    }

    /// Whether both handles refer to the same underlying track.
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register the hook that releases the backing resource.
    ///
    /// Runs once when the track ends. If the track has already ended the hook
    /// runs immediately.
    pub fn on_stop(&self, hook: impl FnOnce() + Send + 'static) {
        if self.is_live() {
            let mut slot = self.inner.stop_hook.lock();
            if self.is_live() {
                *slot = Some(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Stop the track as its owner. Returns `false` if it had already ended.
    pub fn stop(&self) -> bool {
        self.finish(EndReason::Stopped)
    }

    /// Mark the track as terminated by its source (device unplugged, capture
    /// revoked). Returns `false` if it had already ended.
    pub fn end(&self) -> bool {
        self.finish(EndReason::SourceEnded)
    }

    fn finish(&self, reason: EndReason) -> bool {
        let hook = {
            let mut end_reason = self.inner.end_reason.lock();
            if end_reason.is_some() {
                return false;
            }
            *end_reason = Some(reason);
            self.inner.state.send_replace(TrackState::Ended);
            self.inner.stop_hook.lock().take()
        };
        if let Some(hook) = hook {
            hook();
        }
        tracing::debug!(track = %self.inner.id, ?reason, "Track ended");
        true
    }

    /// Resolve once the track has ended.
    pub async fn ended(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == TrackState::Ended).await;
    }

    /// Publish a decoded video frame. Returns `false` if the track has ended
    /// or is not a video track.
    pub fn push_frame(&self, frame: VideoFrame) -> bool {
        match &self.inner.payload {
            Payload::Video(tx) if self.is_live() => {
                tx.send_replace(Some(Arc::new(frame)));
                true
            }
            _ => false,
        }
    }

    /// Most recent decoded frame, if any arrived yet.
    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        match &self.inner.payload {
            Payload::Video(tx) => tx.borrow().clone(),
            Payload::Audio(_) => None,
        }
    }

    /// Latest-frame receiver. `None` for audio tracks.
    pub fn subscribe_frames(&self) -> Option<watch::Receiver<Option<Arc<VideoFrame>>>> {
        match &self.inner.payload {
            Payload::Video(tx) => Some(tx.subscribe()),
            Payload::Audio(_) => None,
        }
    }

    /// Publish an audio chunk. Returns `false` if the track has ended or is
    /// not an audio track.
    pub fn push_audio(&self, chunk: AudioChunk) -> bool {
        match &self.inner.payload {
            Payload::Audio(tx) if self.is_live() => {
                // No subscribers is fine; the chunk is simply not heard.
                let _ = tx.send(chunk);
                true
            }
            _ => false,
        }
    }

    /// Audio chunk receiver. `None` for video tracks.
    pub fn subscribe_audio(&self) -> Option<broadcast::Receiver<AudioChunk>> {
        match &self.inner.payload {
            Payload::Audio(tx) => Some(tx.subscribe()),
            Payload::Video(_) => None,
        }
    }
}

/// An ordered collection of tracks captured or produced together.
#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: impl IntoIterator<Item = MediaTrack>) -> Self {
        Self {
            tracks: tracks.into_iter().collect(),
        }
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn first_video(&self) -> Option<&MediaTrack> {
        self.video_tracks().next()
    }

    pub fn first_audio(&self) -> Option<&MediaTrack> {
        self.audio_tracks().next()
    }

    /// Take ownership of the tracks.
    pub fn into_tracks(self) -> Vec<MediaTrack> {
        self.tracks
    }

    /// Stop every track. Returns how many were actually stopped by this call.
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_stop_runs_hook_exactly_once() {
        let track = MediaTrack::new_video("cam");
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        track.on_stop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let clone = track.clone();
        assert!(track.stop());
        assert!(!clone.stop());
        assert!(!clone.end());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(clone.end_reason(), Some(EndReason::Stopped));
    }

    #[test]
    fn test_hook_registered_after_end_runs_immediately() {
        let track = MediaTrack::new_audio("mic");
        track.end();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        track.on_stop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ended_tracks_reject_frames() {
        let track = MediaTrack::new_video("screen");
        assert!(track.push_frame(VideoFrame::solid(4, 4, [1, 2, 3, 255], 0)));
        assert!(track.latest_frame().is_some());
        track.stop();
        assert!(!track.push_frame(VideoFrame::solid(4, 4, [0, 0, 0, 255], 1)));
        assert!(!track.push_audio(AudioChunk::silence(10, 0)));
    }

    #[tokio::test]
    async fn test_ended_future_resolves() {
        let track = MediaTrack::new_video("cam");
        let waiter = {
            let track = track.clone();
            tokio::spawn(async move { track.ended().await })
        };
        track.end();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_stream_filters_by_kind() {
        let stream = MediaStream::from_tracks([
            MediaTrack::new_video("v"),
            MediaTrack::new_audio("a"),
        ]);
        assert_eq!(stream.video_tracks().count(), 1);
        assert_eq!(stream.first_audio().map(|t| t.kind()), Some(TrackKind::Audio));
        assert_eq!(stream.stop_all(), 2);
        assert_eq!(stream.stop_all(), 0);
    }
}
