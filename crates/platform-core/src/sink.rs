//! Hidden decode sinks.
//!
//! Every acquired video track is wrapped in a [`DecodeSink`] that is never
//! shown in any UI. The compositor reads the most recent decoded frame from
//! it on every tick. A sink is "ready" only once at least one frame has been
//! decoded; readiness normally lags acquisition by a few frames.

use std::sync::Arc;

use tokio::sync::watch;

use crate::frame::VideoFrame;
use crate::track::{MediaTrack, TrackKind};

/// Readiness of a decode sink, mirroring how much data it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkReadiness {
    /// No frame decoded yet.
    Empty,
    /// A current frame is available.
    HaveCurrentData,
    /// The underlying track ended.
    Ended,
}

/// Reads decoded frames from one video track.
#[derive(Debug, Clone)]
pub struct DecodeSink {
    track: MediaTrack,
    frames: watch::Receiver<Option<Arc<VideoFrame>>>,
}

impl DecodeSink {
    /// Attach a sink to a video track. Returns `None` for audio tracks.
    pub fn attach(track: &MediaTrack) -> Option<Self> {
        if track.kind() != TrackKind::Video {
            return None;
        }
        let frames = track.subscribe_frames()?;
        Some(Self {
            track: track.clone(),
            frames,
        })
    }

    pub fn track(&self) -> &MediaTrack {
        &self.track
    }

    pub fn readiness(&self) -> SinkReadiness {
        if !self.track.is_live() {
            return SinkReadiness::Ended;
        }
        if self.frames.borrow().is_some() {
            SinkReadiness::HaveCurrentData
        } else {
            SinkReadiness::Empty
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == SinkReadiness::HaveCurrentData
    }

    /// The current decoded frame, or `None` when the sink is not ready.
    pub fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        if !self.track.is_live() {
            return None;
        }
        self.frames.borrow().clone()
    }

    /// Wait until the first frame has been decoded or the track ended.
    pub async fn wait_ready(&mut self) -> SinkReadiness {
        let track = self.track.clone();
        loop {
            let readiness = self.readiness();
            if readiness != SinkReadiness::Empty {
                return readiness;
            }
            tokio::select! {
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        return SinkReadiness::Ended;
                    }
                }
                _ = track.ended() => return SinkReadiness::Ended,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_becomes_ready_after_first_frame() {
        let track = MediaTrack::new_video("cam");
        let sink = DecodeSink::attach(&track).unwrap();
        assert_eq!(sink.readiness(), SinkReadiness::Empty);
        assert!(sink.current_frame().is_none());

        track.push_frame(VideoFrame::solid(8, 8, [255, 0, 0, 255], 1));
        assert!(sink.is_ready());
        assert_eq!(sink.current_frame().unwrap().pixel(0, 0), [255, 0, 0, 255]);

        track.end();
        assert_eq!(sink.readiness(), SinkReadiness::Ended);
        assert!(sink.current_frame().is_none());
    }

    #[test]
    fn test_audio_tracks_have_no_sink() {
        assert!(DecodeSink::attach(&MediaTrack::new_audio("mic")).is_none());
    }

    #[tokio::test]
    async fn test_wait_ready_resolves_on_first_frame() {
        let track = MediaTrack::new_video("cam");
        let mut sink = DecodeSink::attach(&track).unwrap();
        let producer = track.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            producer.push_frame(VideoFrame::solid(2, 2, [0, 0, 0, 255], 0));
        });
        assert_eq!(sink.wait_ready().await, SinkReadiness::HaveCurrentData);
    }
}
