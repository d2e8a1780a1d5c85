//! One published track.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::{MediaTrack, TrackKind};
use parking_lot::Mutex;

use crate::transport::RtcTransport;

/// A track being sent to the router.
///
/// Closing a producer stops its sender but never the track itself; the
/// track belongs to whoever produced it (compositor or mixer).
pub struct Producer {
    id: String,
    kind: TrackKind,
    local_id: String,
    track: Mutex<MediaTrack>,
    transport: Arc<dyn RtcTransport>,
    closed: AtomicBool,
}

impl Producer {
    pub(crate) fn new(
        id: String,
        kind: TrackKind,
        local_id: String,
        track: MediaTrack,
        transport: Arc<dyn RtcTransport>,
    ) -> Self {
        Self {
            id,
            kind,
            local_id,
            track: Mutex::new(track),
            transport,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn track(&self) -> MediaTrack {
        self.track.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send `track` in place of the current one.
    pub async fn replace_track(&self, track: &MediaTrack) -> CastResult<()> {
        if self.is_closed() {
            return Err(CastError::producer(format!("producer {} is closed", self.id)));
        }
        if track.kind() != self.kind {
            return Err(CastError::producer(format!(
                "cannot replace {} track with {} track",
                self.kind,
                track.kind()
            )));
        }
        self.transport.replace_track(&self.local_id, track).await?;
        let previous = std::mem::replace(&mut *self.track.lock(), track.clone());
        tracing::info!(
            producer = %self.id,
            from = %previous.id(),
            to = %track.id(),
            "Producer track replaced"
        );
        Ok(())
    }

    /// Stop sending. Only the first call has an effect and returns `true`.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Err(e) = self.transport.stop_send(&self.local_id).await {
            tracing::debug!(producer = %self.id, error = %e, "Stopping sender failed");
        }
        tracing::info!(producer = %self.id, kind = %self.kind, "Producer closed");
        true
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::*;
    use crate::rtp::{DtlsParameters, DtlsRole, ProduceOptions};
    use crate::transport::{ConnectionState, LocalSender};

    #[derive(Default)]
    struct RecordingTransport {
        replaced: Mutex<Vec<(String, String)>>,
        stopped: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl RtcTransport for RecordingTransport {
        fn id(&self) -> &str {
            "t"
        }

        fn local_dtls_parameters(&self) -> DtlsParameters {
            DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: Vec::new(),
            }
        }

        fn connection_state(&self) -> watch::Receiver<ConnectionState> {
            watch::channel(ConnectionState::Connected).1
        }

        async fn start_send(&self, _: &MediaTrack, _: &ProduceOptions) -> CastResult<LocalSender> {
            Err(CastError::producer("unused"))
        }

        async fn replace_track(&self, local_id: &str, track: &MediaTrack) -> CastResult<()> {
            self.replaced
                .lock()
                .push((local_id.to_string(), track.id().to_string()));
            Ok(())
        }

        async fn stop_send(&self, local_id: &str) -> CastResult<()> {
            self.stopped.lock().push(local_id.to_string());
            Ok(())
        }

        async fn close(&self) {}
    }

    fn producer(track: &MediaTrack) -> (Producer, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let producer = Producer::new(
            "p1".into(),
            track.kind(),
            "0".into(),
            track.clone(),
            transport.clone(),
        );
        (producer, transport)
    }

    #[tokio::test]
    async fn test_replace_track_swaps_sender_track() {
        let first = MediaTrack::new_audio("mix-1");
        let second = MediaTrack::new_audio("mix-2");
        let (producer, transport) = producer(&first);

        producer.replace_track(&second).await.unwrap();

        assert!(producer.track().same_track(&second));
        assert_eq!(
            transport.replaced.lock().clone(),
            vec![("0".to_string(), second.id().to_string())]
        );
        assert!(first.is_live());
    }

    #[tokio::test]
    async fn test_replace_track_rejects_other_kind() {
        let audio = MediaTrack::new_audio("mix");
        let (producer, transport) = producer(&audio);

        let err = producer
            .replace_track(&MediaTrack::new_video("cam"))
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::Producer { .. }));
        assert!(transport.replaced.lock().is_empty());
    }

    #[tokio::test]
    async fn test_close_once_and_leaves_track_running() {
        let video = MediaTrack::new_video("composite");
        let (producer, transport) = producer(&video);

        assert!(producer.close().await);
        assert!(!producer.close().await);
        assert!(producer.is_closed());
        assert_eq!(transport.stopped.lock().len(), 1);
        assert!(video.is_live());

        assert!(producer.replace_track(&MediaTrack::new_video("other")).await.is_err());
    }
}
