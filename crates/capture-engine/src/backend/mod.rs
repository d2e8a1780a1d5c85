use classcast_common::error::CastResult;
use classcast_media_model::{CaptureConstraints, DeviceInfo, ScreenTarget};
use classcast_platform_core::{MediaStream, MediaTrack};

/// Abstract interface to the platform's capture APIs.
///
/// Implementations report failures as
/// [`CastError::Acquisition`](classcast_common::error::CastError::Acquisition)
/// with the cause classified, so the acquirer can decide whether to retry.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Enumerate cameras, microphones and screens.
    async fn list_devices(&self) -> CastResult<Vec<DeviceInfo>>;

    /// Open a camera. The returned stream holds one live video track.
    async fn open_camera(
        &self,
        device_id: &str,
        constraints: &CaptureConstraints,
    ) -> CastResult<MediaStream>;

    /// Open a screen capture. The stream holds one video track and, when
    /// `with_audio` is set and the platform supports it, one audio track.
    async fn open_screen(
        &self,
        target: &ScreenTarget,
        constraints: &CaptureConstraints,
        with_audio: bool,
    ) -> CastResult<MediaStream>;

    /// Open a microphone; `None` selects the default device.
    async fn open_microphone(&self, device_id: Option<&str>) -> CastResult<MediaTrack>;
}

pub mod gst;

pub use gst::GstCaptureBackend;
