//! Send transport: the local WebRTC stack paired with router signaling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::MediaTrack;
use tokio::sync::watch;

use crate::producer::Producer;
use crate::rtp::{DtlsParameters, ProduceOptions, RtpCapabilities, RtpParameters, TransportOptions};
use crate::signaling::SignalingChannel;

/// ICE/DTLS connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States that call for recovery.
    pub fn is_lost(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// A sender started on a local transport.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSender {
    pub local_id: String,
    pub rtp_parameters: RtpParameters,
}

/// The local WebRTC stack.
#[async_trait::async_trait]
pub trait RtcEngine: Send + Sync {
    async fn create_send_transport(
        &self,
        options: &TransportOptions,
        sendable: &RtpCapabilities,
    ) -> CastResult<Arc<dyn RtcTransport>>;
}

/// One local send transport.
#[async_trait::async_trait]
pub trait RtcTransport: Send + Sync {
    fn id(&self) -> &str;

    fn local_dtls_parameters(&self) -> DtlsParameters;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// Start encoding `track`; returns what will be sent.
    async fn start_send(
        &self,
        track: &MediaTrack,
        options: &ProduceOptions,
    ) -> CastResult<LocalSender>;

    /// Swap the track behind a running sender without renegotiation.
    async fn replace_track(&self, local_id: &str, track: &MediaTrack) -> CastResult<()>;

    async fn stop_send(&self, local_id: &str) -> CastResult<()>;

    async fn close(&self);
}

/// A send transport bound to its signaling channel.
///
/// The DTLS `connect` step runs lazily on the first produce, once.
pub struct SendTransport {
    inner: Arc<dyn RtcTransport>,
    signaling: Arc<dyn SignalingChannel>,
    connected: tokio::sync::Mutex<bool>,
    closed: AtomicBool,
}

impl SendTransport {
    pub fn new(inner: Arc<dyn RtcTransport>, signaling: Arc<dyn SignalingChannel>) -> Self {
        Self {
            inner,
            signaling,
            connected: tokio::sync::Mutex::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn ensure_connected(&self) -> CastResult<()> {
        let mut connected = self.connected.lock().await;
        if !*connected {
            let dtls = self.inner.local_dtls_parameters();
            self.signaling.connect_transport(self.id(), &dtls).await?;
            *connected = true;
            tracing::info!(transport = %self.id(), "Send transport connected");
        }
        Ok(())
    }

    /// Start sending `track` and register it with the router.
    pub async fn produce(
        &self,
        track: &MediaTrack,
        options: &ProduceOptions,
        session_id: &str,
    ) -> CastResult<Producer> {
        if self.is_closed() {
            return Err(CastError::producer("transport is closed"));
        }
        if !track.is_live() {
            return Err(CastError::producer(format!("track {} already ended", track.id())));
        }
        self.ensure_connected().await?;

        let sender = self.inner.start_send(track, options).await?;
        let kind = track.kind();
        let producer_id = match self
            .signaling
            .produce(self.id(), kind, &sender.rtp_parameters, session_id)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                if let Err(stop_err) = self.inner.stop_send(&sender.local_id).await {
                    tracing::debug!(error = %stop_err, "Stopping orphaned sender failed");
                }
                return Err(CastError::producer(format!("{kind} produce rejected: {e}")));
            }
        };

        tracing::info!(
            producer = %producer_id,
            kind = %kind,
            track = %track.id(),
            "Producer created"
        );
        Ok(Producer::new(
            producer_id,
            kind,
            sender.local_id,
            track.clone(),
            self.inner.clone(),
        ))
    }

    /// Close the local transport. Only the first call has an effect.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.close().await;
        tracing::info!(transport = %self.id(), "Send transport closed");
        true
    }
}
