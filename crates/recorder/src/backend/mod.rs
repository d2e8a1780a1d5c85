use std::sync::Arc;
use std::time::Duration;

use classcast_common::error::CastResult;
use classcast_platform_core::MediaStream;
use tokio::sync::{mpsc, watch};

/// Stop controls of a running encoder.
pub trait RecorderControl: Send + Sync {
    /// Finish gracefully: flush the final chunk, then report stopped.
    fn request_stop(&self);

    /// Tear down immediately. Pending data may be lost.
    fn force_stop(&self);
}

/// A running encoder.
///
/// `chunks` yields encoded container data roughly once per timeslice and
/// closes when the encoder is done. `stopped` turns `true` once the encoder
/// has emitted its last chunk.
pub struct RecorderSession {
    pub chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    pub stopped: watch::Receiver<bool>,
    pub control: Arc<dyn RecorderControl>,
}

/// Container encoding platform.
#[async_trait::async_trait]
pub trait RecorderBackend: Send + Sync {
    fn name(&self) -> &str;

    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Start encoding `stream` into `mime_type`.
    async fn start(
        &self,
        stream: &MediaStream,
        mime_type: &str,
        timeslice: Duration,
    ) -> CastResult<RecorderSession>;
}

pub mod gst;

pub use gst::GstRecorderBackend;
