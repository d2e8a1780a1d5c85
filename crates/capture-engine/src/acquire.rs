//! Source acquisition with constraint fallback and busy-device retry.

use std::sync::Arc;

use classcast_common::config::CaptureConfig;
use classcast_common::error::{AcquisitionCause, CastError, CastResult};
use classcast_media_model::{
    CaptureConstraints, DeviceInfo, MicrophoneDescriptor, SourceDescriptor, SourceId, SourceKind,
};
use classcast_platform_core::{DecodeSink, MediaStream, MediaTrack};

use crate::backend::CaptureBackend;

/// One acquired video source.
///
/// The raw tracks belong to the session; the decode sink is handed to the
/// compositor, which reads frames from it every tick.
#[derive(Debug, Clone)]
pub struct Source {
    kind: SourceKind,
    descriptor: SourceDescriptor,
    video: MediaTrack,
    audio: Option<MediaTrack>,
    sink: DecodeSink,
}

impl Source {
    /// Build a source from an acquired stream. Fails if the stream carries no
    /// video track.
    pub fn from_stream(descriptor: SourceDescriptor, stream: MediaStream) -> CastResult<Self> {
        let Some(video) = stream.first_video().cloned() else {
            stream.stop_all();
            return Err(CastError::acquisition(
                AcquisitionCause::Other,
                format!("{} produced no video track", descriptor.id()),
            ));
        };
        let audio = stream.first_audio().cloned();
        let sink = DecodeSink::attach(&video).ok_or_else(|| {
            CastError::acquisition(AcquisitionCause::Other, "video track rejected decode sink")
        })?;
        Ok(Self {
            kind: descriptor.kind.clone(),
            descriptor,
            video,
            audio,
            sink,
        })
    }

    pub fn id(&self) -> SourceId {
        self.kind.id()
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn video(&self) -> &MediaTrack {
        &self.video
    }

    /// Screen audio captured together with the surface, if any.
    pub fn audio(&self) -> Option<&MediaTrack> {
        self.audio.as_ref()
    }

    pub fn sink(&self) -> &DecodeSink {
        &self.sink
    }

    /// Whether every track of this source is still live.
    pub fn is_live(&self) -> bool {
        self.video.is_live() && self.audio.as_ref().map_or(true, |a| a.is_live())
    }

    /// Stop the raw tracks. Returns how many tracks this call stopped.
    pub fn release(&self) -> usize {
        let mut stopped = usize::from(self.video.stop());
        if let Some(audio) = &self.audio {
            stopped += usize::from(audio.stop());
        }
        stopped
    }
}

/// Result of a microphone request.
#[derive(Debug, Default)]
pub struct MicrophoneAcquisition {
    pub track: Option<MediaTrack>,
    /// Set when the session continues without a microphone.
    pub warning: Option<String>,
}

/// Opens sources through a [`CaptureBackend`].
#[derive(Clone)]
pub struct SourceAcquirer {
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
}

impl SourceAcquirer {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: CaptureConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn list_devices(&self) -> CastResult<Vec<DeviceInfo>> {
        self.backend.list_devices().await
    }

    /// Constraints requested for a source kind.
    pub fn constraints_for(&self, kind: &SourceKind) -> CaptureConstraints {
        let c = &self.config;
        match kind {
            SourceKind::Camera { .. } => {
                CaptureConstraints::ideal(c.camera_width, c.camera_height, c.camera_fps)
            }
            SourceKind::Screen { .. } => {
                CaptureConstraints::ideal(c.screen_width, c.screen_height, c.screen_fps)
                    .with_max_frame_rate(c.screen_max_fps)
            }
        }
    }

    /// Acquire one video source.
    ///
    /// Unsatisfiable constraints are retried once without a resolution
    /// preference; a busy device is retried with a delay up to the
    /// configured attempt count.
    pub async fn acquire(&self, descriptor: &SourceDescriptor) -> CastResult<Source> {
        let id = descriptor.id();
        let mut constraints = self.constraints_for(&descriptor.kind);
        let mut busy_attempts = 0u32;

        loop {
            tracing::info!(source = %id, ?constraints, "Acquiring source");
            let result = match &descriptor.kind {
                SourceKind::Camera { device_id } => {
                    self.backend.open_camera(device_id, &constraints).await
                }
                SourceKind::Screen { target } => {
                    self.backend
                        .open_screen(target, &constraints, descriptor.capture_audio)
                        .await
                }
            };

            match result {
                Ok(stream) => {
                    let source = Source::from_stream(descriptor.clone(), stream)?;
                    tracing::info!(
                        source = %id,
                        track = %source.video().id(),
                        audio = source.audio().is_some(),
                        "Source acquired"
                    );
                    return Ok(source);
                }
                Err(e) => match e.acquisition_cause() {
                    Some(AcquisitionCause::ConstraintsUnsatisfiable)
                        if !constraints.is_relaxed() =>
                    {
                        tracing::warn!(
                            source = %id,
                            error = %e,
                            "Retrying with relaxed constraints"
                        );
                        constraints = constraints.relaxed();
                    }
                    Some(AcquisitionCause::DeviceBusy)
                        if busy_attempts < self.config.busy_retry_attempts =>
                    {
                        busy_attempts += 1;
                        tracing::warn!(
                            source = %id,
                            attempt = busy_attempts,
                            "Device busy, retrying"
                        );
                        tokio::time::sleep(self.config.busy_retry_delay()).await;
                    }
                    _ => {
                        tracing::error!(source = %id, error = %e, "Source acquisition failed");
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Acquire a microphone.
    ///
    /// A denied permission or a missing device does not abort the session:
    /// the result carries no track and a warning instead.
    pub async fn acquire_microphone(
        &self,
        descriptor: &MicrophoneDescriptor,
    ) -> CastResult<MicrophoneAcquisition> {
        match self
            .backend
            .open_microphone(descriptor.device_id.as_deref())
            .await
        {
            Ok(track) => {
                tracing::info!(track = %track.id(), "Microphone acquired");
                Ok(MicrophoneAcquisition {
                    track: Some(track),
                    warning: None,
                })
            }
            Err(e) => match e.acquisition_cause() {
                Some(
                    cause @ (AcquisitionCause::PermissionDenied | AcquisitionCause::DeviceNotFound),
                ) => {
                    let warning =
                        format!("microphone unavailable ({cause}); continuing without audio");
                    tracing::warn!(error = %e, "{warning}");
                    Ok(MicrophoneAcquisition {
                        track: None,
                        warning: Some(warning),
                    })
                }
                _ => Err(e),
            },
        }
    }
}
