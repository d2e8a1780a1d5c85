//! Everything a running session holds, released in one place.

use classcast_capture_engine::{AudioMixer, Source};
use classcast_common::error::CastResult;
use classcast_platform_core::MediaTrack;
use classcast_publish::{HealthMonitor, PublishPipeline};
use classcast_recorder::{LocalRecorder, Recording};
use classcast_render_engine::{Compositor, TrackLease};

/// Handles owned by one session. Each is an `Option` taken exactly once by
/// [`SessionResources::release`], so partial starts and repeated teardowns
/// release nothing twice.
#[derive(Default)]
pub(crate) struct SessionResources {
    pub sources: Vec<Source>,
    pub microphone: Option<MediaTrack>,
    pub mixer: Option<AudioMixer>,
    pub compositor: Option<Compositor>,
    pub publish: Option<PublishPipeline>,
    pub publish_lease: Option<TrackLease>,
    pub recorder: Option<LocalRecorder>,
    pub record_lease: Option<TrackLease>,
    /// Source supervision for sessions that do not publish.
    pub monitor: Option<HealthMonitor>,
}

impl SessionResources {
    /// Live tracks feeding the mixer: microphone first, then source audio.
    pub fn audio_inputs(&self) -> Vec<MediaTrack> {
        self.microphone
            .iter()
            .chain(self.sources.iter().filter_map(Source::audio))
            .filter(|t| t.is_live())
            .cloned()
            .collect()
    }

    pub fn health(&self) -> Option<&HealthMonitor> {
        self.publish
            .as_ref()
            .and_then(PublishPipeline::health)
            .or(self.monitor.as_ref())
    }

    pub fn watch_track(&self, track: &MediaTrack) {
        if let Some(health) = self.health() {
            health.watch_track(track);
        }
    }

    /// Tear down in dependency order: consumers of the composite first,
    /// then the compositor, the mixer and finally the capture tracks.
    ///
    /// Returns the recorder outcome when a recorder was running.
    pub async fn release(&mut self) -> Option<CastResult<Recording>> {
        let recording = match self.recorder.take() {
            Some(recorder) => Some(recorder.stop().await),
            None => None,
        };
        self.record_lease.take();

        if let Some(mut publish) = self.publish.take() {
            publish.close().await;
        }
        self.publish_lease.take();
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }

        if let Some(compositor) = self.compositor.take() {
            compositor.stop();
        }
        if let Some(mixer) = self.mixer.take() {
            mixer.close();
        }

        let mut stopped = 0;
        for source in self.sources.drain(..) {
            stopped += source.release();
        }
        if let Some(microphone) = self.microphone.take() {
            if microphone.stop() {
                stopped += 1;
            }
        }
        tracing::info!(tracks = stopped, "Session resources released");
        recording
    }
}
