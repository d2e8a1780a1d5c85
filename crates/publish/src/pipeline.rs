//! Publish state machine.

use std::sync::Arc;

use classcast_common::config::PublishConfig;
use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::{MediaTrack, TrackKind};
use tokio::sync::{mpsc, watch};

use crate::device::{local_capabilities, Device};
use crate::health::{HealthEvent, HealthMonitor};
use crate::producer::Producer;
use crate::rtp::ProduceOptions;
use crate::signaling::SignalingChannel;
use crate::transport::{RtcEngine, SendTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    CapabilitiesNegotiated,
    TransportReady,
    Producing,
    Failed(String),
    Reconnecting,
}

/// Producers created by [`PublishPipeline::publish`].
#[derive(Debug, Clone)]
pub struct PublishedTracks {
    pub video: Arc<Producer>,
    pub audio: Option<Arc<Producer>>,
}

pub struct PublishPipeline {
    signaling: Arc<dyn SignalingChannel>,
    engine: Arc<dyn RtcEngine>,
    config: PublishConfig,
    state: watch::Sender<PublishState>,
    device: Option<Device>,
    transport: Option<SendTransport>,
    producers: Vec<Arc<Producer>>,
    health: Option<HealthMonitor>,
}

impl PublishPipeline {
    pub fn new(
        signaling: Arc<dyn SignalingChannel>,
        engine: Arc<dyn RtcEngine>,
        config: PublishConfig,
    ) -> Self {
        let (state, _) = watch::channel(PublishState::Idle);
        Self {
            signaling,
            engine,
            config,
            state,
            device: None,
            transport: None,
            producers: Vec::new(),
            health: None,
        }
    }

    pub fn state(&self) -> PublishState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PublishState> {
        self.state.subscribe()
    }

    fn transition(&self, next: PublishState) {
        tracing::debug!(from = ?*self.state.borrow(), to = ?next, "Publish state");
        self.state.send_replace(next);
    }

    /// Fetch the router capabilities and load the local device.
    pub async fn negotiate(&mut self) -> CastResult<()> {
        let router = self
            .signaling
            .get_capabilities()
            .await
            .map_err(|e| CastError::negotiation(format!("capabilities request failed: {e}")))?;
        let device = Device::load(&local_capabilities(), &router)?;
        self.device = Some(device);
        self.transition(PublishState::CapabilitiesNegotiated);
        Ok(())
    }

    /// Create the send transport. Requires a negotiated device.
    pub async fn open_transport(&mut self) -> CastResult<()> {
        let Some(device) = &self.device else {
            return Err(CastError::negotiation("transport requested before negotiation"));
        };
        let options = self.signaling.create_send_transport().await?;
        let rtc = self
            .engine
            .create_send_transport(&options, device.sendable())
            .await?;
        tracing::info!(transport = %rtc.id(), "Send transport created");
        self.transport = Some(SendTransport::new(rtc, self.signaling.clone()));
        self.transition(PublishState::TransportReady);
        Ok(())
    }

    /// Produce one track with the options for its kind.
    pub async fn produce(
        &mut self,
        track: &MediaTrack,
        session_id: &str,
    ) -> CastResult<Arc<Producer>> {
        let (Some(device), Some(transport)) = (&self.device, &self.transport) else {
            return Err(CastError::producer("no transport to produce on"));
        };
        let kind = track.kind();
        if !device.can_produce(kind) {
            return Err(CastError::producer(format!("router cannot receive {kind}")));
        }
        let options = ProduceOptions::for_kind(kind, &self.config);
        let producer = Arc::new(transport.produce(track, &options, session_id).await?);
        self.producers.push(producer.clone());
        self.transition(PublishState::Producing);
        Ok(producer)
    }

    /// Run the whole sequence: negotiate, open the transport, produce video
    /// and, when present and receivable, audio.
    ///
    /// On failure everything opened so far is closed and the state becomes
    /// `Failed`.
    pub async fn publish(
        &mut self,
        video: &MediaTrack,
        audio: Option<&MediaTrack>,
        session_id: &str,
    ) -> CastResult<PublishedTracks> {
        match self.publish_inner(video, audio, session_id).await {
            Ok(published) => Ok(published),
            Err(e) => {
                self.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn publish_inner(
        &mut self,
        video: &MediaTrack,
        audio: Option<&MediaTrack>,
        session_id: &str,
    ) -> CastResult<PublishedTracks> {
        self.negotiate().await?;
        self.open_transport().await?;
        let video = self.produce(video, session_id).await?;

        let audio = match audio {
            None => {
                tracing::info!("No audio track; publishing video only");
                None
            }
            Some(_) if !self.can_produce(TrackKind::Audio) => {
                tracing::warn!("Router cannot receive audio; publishing video only");
                None
            }
            Some(track) => Some(self.produce(track, session_id).await?),
        };
        Ok(PublishedTracks { video, audio })
    }

    pub fn can_produce(&self, kind: TrackKind) -> bool {
        self.device.as_ref().is_some_and(|d| d.can_produce(kind))
    }

    pub fn producer(&self, kind: TrackKind) -> Option<Arc<Producer>> {
        self.producers
            .iter()
            .find(|p| p.kind() == kind && !p.is_closed())
            .cloned()
    }

    pub fn producers(&self) -> &[Arc<Producer>] {
        &self.producers
    }

    /// Start the health observers over the current transport and producers.
    pub fn start_health(&mut self) -> CastResult<mpsc::UnboundedReceiver<HealthEvent>> {
        let Some(transport) = &self.transport else {
            return Err(CastError::producer("no transport to supervise"));
        };
        let (monitor, events) = HealthMonitor::spawn(
            transport.connection_state(),
            self.producers.clone(),
            self.config.health_interval(),
        );
        self.health = Some(monitor);
        Ok(events)
    }

    pub fn health(&self) -> Option<&HealthMonitor> {
        self.health.as_ref()
    }

    pub fn mark_reconnecting(&self) {
        self.transition(PublishState::Reconnecting);
    }

    async fn release(&mut self) -> bool {
        let mut released = false;
        if let Some(mut health) = self.health.take() {
            health.stop();
            released = true;
        }
        for producer in self.producers.drain(..) {
            released |= producer.close().await;
        }
        if let Some(transport) = self.transport.take() {
            released |= transport.close().await;
        }
        released |= self.device.take().is_some();
        released
    }

    async fn fail(&mut self, reason: String) {
        self.release().await;
        tracing::error!(reason = %reason, "Publish failed");
        self.transition(PublishState::Failed(reason));
    }

    /// Close producers and the transport and return to `Idle`.
    /// Tracks are never stopped here. Returns `false` if nothing was open.
    pub async fn close(&mut self) -> bool {
        let released = self.release().await;
        self.transition(PublishState::Idle);
        if released {
            tracing::info!("Publish pipeline closed");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::rtp::{
        DtlsParameters, DtlsRole, RtpCapabilities, RtpCodecCapability, RtpParameters,
        TransportOptions,
    };
    use crate::transport::{ConnectionState, LocalSender, RtcTransport};

    #[derive(Default)]
    struct FakeRouter {
        connects: AtomicUsize,
        produced: Mutex<Vec<TrackKind>>,
        reject_audio: bool,
        video_only: bool,
    }

    #[async_trait::async_trait]
    impl SignalingChannel for FakeRouter {
        async fn get_capabilities(&self) -> CastResult<RtpCapabilities> {
            let mut codecs = vec![RtpCodecCapability::video("video/VP8")];
            if !self.video_only {
                codecs.push(RtpCodecCapability::opus());
            }
            Ok(RtpCapabilities { codecs })
        }

        async fn create_send_transport(&self) -> CastResult<TransportOptions> {
            Ok(TransportOptions {
                id: "transport-1".into(),
                ice_parameters: serde_json::Value::Null,
                ice_candidates: Vec::new(),
                dtls_parameters: dtls(),
            })
        }

        async fn connect_transport(&self, _: &str, _: &DtlsParameters) -> CastResult<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn produce(
            &self,
            _: &str,
            kind: TrackKind,
            _: &RtpParameters,
            _: &str,
        ) -> CastResult<String> {
            if kind == TrackKind::Audio && self.reject_audio {
                return Err(CastError::signaling("audio not allowed"));
            }
            let mut produced = self.produced.lock();
            produced.push(kind);
            Ok(format!("producer-{}", produced.len()))
        }
    }

    fn dtls() -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Auto,
            fingerprints: Vec::new(),
        }
    }

    struct FakeTransport {
        state: watch::Sender<ConnectionState>,
        senders: AtomicUsize,
        stopped: Mutex<Vec<String>>,
        closed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RtcTransport for FakeTransport {
        fn id(&self) -> &str {
            "transport-1"
        }

        fn local_dtls_parameters(&self) -> DtlsParameters {
            dtls()
        }

        fn connection_state(&self) -> watch::Receiver<ConnectionState> {
            self.state.subscribe()
        }

        async fn start_send(&self, _: &MediaTrack, _: &ProduceOptions) -> CastResult<LocalSender> {
            let n = self.senders.fetch_add(1, Ordering::SeqCst);
            Ok(LocalSender {
                local_id: n.to_string(),
                rtp_parameters: RtpParameters {
                    mid: Some(n.to_string()),
                    codecs: Vec::new(),
                    encodings: Vec::new(),
                },
            })
        }

        async fn replace_track(&self, _: &str, _: &MediaTrack) -> CastResult<()> {
            Ok(())
        }

        async fn stop_send(&self, local_id: &str) -> CastResult<()> {
            self.stopped.lock().push(local_id.to_string());
            Ok(())
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeEngine {
        transport: Arc<FakeTransport>,
    }

    impl FakeEngine {
        fn new() -> Self {
            let (state, _) = watch::channel(ConnectionState::New);
            Self {
                transport: Arc::new(FakeTransport {
                    state,
                    senders: AtomicUsize::new(0),
                    stopped: Mutex::new(Vec::new()),
                    closed: AtomicUsize::new(0),
                }),
            }
        }
    }

    #[async_trait::async_trait]
    impl RtcEngine for FakeEngine {
        async fn create_send_transport(
            &self,
            _: &TransportOptions,
            _: &RtpCapabilities,
        ) -> CastResult<Arc<dyn RtcTransport>> {
            Ok(self.transport.clone())
        }
    }

    fn pipeline(router: Arc<FakeRouter>, engine: Arc<FakeEngine>) -> PublishPipeline {
        PublishPipeline::new(router, engine, PublishConfig::default())
    }

    #[tokio::test]
    async fn test_publishes_video_and_audio_with_one_connect() {
        let router = Arc::new(FakeRouter::default());
        let engine = Arc::new(FakeEngine::new());
        let mut publish = pipeline(router.clone(), engine.clone());

        let video = MediaTrack::new_video("composite");
        let audio = MediaTrack::new_audio("mixed");
        let published = publish.publish(&video, Some(&audio), "s1").await.unwrap();

        assert!(published.audio.is_some());
        assert_eq!(router.connects.load(Ordering::SeqCst), 1);
        assert_eq!(*router.produced.lock(), vec![TrackKind::Video, TrackKind::Audio]);
        assert_eq!(publish.state(), PublishState::Producing);
    }

    #[tokio::test]
    async fn test_zero_audio_still_publishes_video() {
        let router = Arc::new(FakeRouter::default());
        let mut publish = pipeline(router.clone(), Arc::new(FakeEngine::new()));
        let video = MediaTrack::new_video("composite");

        let published = publish.publish(&video, None, "s1").await.unwrap();
        assert!(published.audio.is_none());
        assert_eq!(*router.produced.lock(), vec![TrackKind::Video]);
        assert!(publish.producer(TrackKind::Audio).is_none());
    }

    #[tokio::test]
    async fn test_router_without_audio_codec_skips_audio() {
        let router = Arc::new(FakeRouter {
            video_only: true,
            ..FakeRouter::default()
        });
        let mut publish = pipeline(router.clone(), Arc::new(FakeEngine::new()));
        let published = publish
            .publish(&MediaTrack::new_video("v"), Some(&MediaTrack::new_audio("a")), "s1")
            .await
            .unwrap();
        assert!(published.audio.is_none());
    }

    #[tokio::test]
    async fn test_produce_failure_unwinds_and_marks_failed() {
        let router = Arc::new(FakeRouter {
            reject_audio: true,
            ..FakeRouter::default()
        });
        let engine = Arc::new(FakeEngine::new());
        let mut publish = pipeline(router, engine.clone());
        let video = MediaTrack::new_video("composite");
        let audio = MediaTrack::new_audio("mixed");

        let err = publish.publish(&video, Some(&audio), "s1").await.unwrap_err();
        assert!(matches!(err, CastError::Producer { .. }));
        assert!(matches!(publish.state(), PublishState::Failed(_)));
        assert_eq!(engine.transport.closed.load(Ordering::SeqCst), 1);
        // The orphaned audio sender and the video producer were both stopped.
        assert_eq!(engine.transport.stopped.lock().len(), 2);
        assert!(video.is_live() && audio.is_live());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_keeps_tracks() {
        let mut publish = pipeline(Arc::new(FakeRouter::default()), Arc::new(FakeEngine::new()));
        let video = MediaTrack::new_video("composite");
        publish.publish(&video, None, "s1").await.unwrap();

        assert!(publish.close().await);
        assert!(!publish.close().await);
        assert_eq!(publish.state(), PublishState::Idle);
        assert!(video.is_live());
    }

    #[tokio::test]
    async fn test_producer_replace_track_swaps_kind_checked() {
        let mut publish = pipeline(Arc::new(FakeRouter::default()), Arc::new(FakeEngine::new()));
        let audio = MediaTrack::new_audio("mixed");
        let published = publish
            .publish(&MediaTrack::new_video("v"), Some(&audio), "s1")
            .await
            .unwrap();
        let producer = published.audio.unwrap();

        let replacement = MediaTrack::new_audio("remixed");
        producer.replace_track(&replacement).await.unwrap();
        assert!(producer.track().same_track(&replacement));
        assert!(producer
            .replace_track(&MediaTrack::new_video("wrong"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_health_reports_ended_tracks_and_lost_connection() {
        let engine = Arc::new(FakeEngine::new());
        let mut publish = PublishPipeline::new(
            Arc::new(FakeRouter::default()),
            engine.clone(),
            PublishConfig {
                health_interval_ms: 10,
                ..PublishConfig::default()
            },
        );
        let video = MediaTrack::new_video("composite");
        publish.publish(&video, None, "s1").await.unwrap();
        let mut events = publish.start_health().unwrap();

        let camera = MediaTrack::new_video("camera");
        publish.health().unwrap().watch_track(&camera);
        camera.end();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            HealthEvent::TrackEnded {
                kind: TrackKind::Video,
                track_id: camera.id().to_string(),
            }
        );

        engine.transport.state.send_replace(ConnectionState::Failed);
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            HealthEvent::ConnectionLost {
                state: ConnectionState::Failed
            }
        );
    }
}
