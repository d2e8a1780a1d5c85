//! Loopback WebRTC stack: sent tracks are consumed locally and counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::{MediaTrack, TrackKind};
use classcast_publish::{
    ConnectionState, DtlsFingerprint, DtlsParameters, DtlsRole, LocalSender, ProduceOptions,
    RtcEngine, RtcTransport, RtpCapabilities, RtpParameters, TransportOptions,
};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What one sender has transmitted so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderStats {
    pub local_id: String,
    pub kind: TrackKind,
    pub track_id: String,
    pub frames: u64,
    pub audio_chunks: u64,
    pub options: ProduceOptions,
    pub stopped: bool,
}

struct SenderSlot {
    stats: Arc<Mutex<SenderStats>>,
    task: JoinHandle<()>,
}

fn consume(track: MediaTrack, stats: Arc<Mutex<SenderStats>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(mut frames) = track.subscribe_frames() {
            loop {
                tokio::select! {
                    changed = frames.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        stats.lock().frames += 1;
                    }
                    _ = track.ended() => break,
                }
            }
        } else if let Some(mut chunks) = track.subscribe_audio() {
            loop {
                tokio::select! {
                    received = chunks.recv() => match received {
                        Ok(_) => stats.lock().audio_chunks += 1,
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    _ = track.ended() => break,
                }
            }
        }
    })
}

pub struct LoopbackTransport {
    id: String,
    state: watch::Sender<ConnectionState>,
    senders: Mutex<HashMap<String, SenderSlot>>,
    next_sender: AtomicU64,
    closed: AtomicBool,
}

impl LoopbackTransport {
    fn new(id: String) -> Self {
        let (state, _) = watch::channel(ConnectionState::New);
        Self {
            id,
            state,
            senders: Mutex::new(HashMap::new()),
            next_sender: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        tracing::debug!(transport = %self.id, ?state, "Simulated connection state");
        self.state.send_replace(state);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sender_stats(&self) -> Vec<SenderStats> {
        let mut stats: Vec<SenderStats> = self
            .senders
            .lock()
            .values()
            .map(|slot| slot.stats.lock().clone())
            .collect();
        stats.sort_by(|a, b| a.local_id.cmp(&b.local_id));
        stats
    }
}

#[async_trait::async_trait]
impl RtcTransport for LoopbackTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn local_dtls_parameters(&self) -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: "AA:BB:CC:DD".into(),
            }],
        }
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn start_send(
        &self,
        track: &MediaTrack,
        options: &ProduceOptions,
    ) -> CastResult<LocalSender> {
        if self.is_closed() {
            return Err(CastError::producer("transport closed"));
        }
        let local_id = self.next_sender.fetch_add(1, Ordering::Relaxed).to_string();
        let stats = Arc::new(Mutex::new(SenderStats {
            local_id: local_id.clone(),
            kind: track.kind(),
            track_id: track.id().to_string(),
            frames: 0,
            audio_chunks: 0,
            options: options.clone(),
            stopped: false,
        }));
        let task = consume(track.clone(), stats.clone());
        self.senders
            .lock()
            .insert(local_id.clone(), SenderSlot { stats, task });
        self.state.send_replace(ConnectionState::Connected);

        Ok(LocalSender {
            rtp_parameters: RtpParameters {
                mid: Some(local_id.clone()),
                codecs: Vec::new(),
                encodings: options.encodings.clone(),
            },
            local_id,
        })
    }

    async fn replace_track(&self, local_id: &str, track: &MediaTrack) -> CastResult<()> {
        let mut senders = self.senders.lock();
        let slot = senders
            .get_mut(local_id)
            .ok_or_else(|| CastError::producer(format!("no sender {local_id}")))?;
        slot.task.abort();
        slot.stats.lock().track_id = track.id().to_string();
        slot.task = consume(track.clone(), slot.stats.clone());
        Ok(())
    }

    async fn stop_send(&self, local_id: &str) -> CastResult<()> {
        if let Some(slot) = self.senders.lock().get(local_id) {
            slot.task.abort();
            slot.stats.lock().stopped = true;
        }
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in self.senders.lock().values() {
            slot.task.abort();
            slot.stats.lock().stopped = true;
        }
        self.state.send_replace(ConnectionState::Closed);
    }
}

/// Engine handing out [`LoopbackTransport`]s.
#[derive(Default)]
pub struct LoopbackEngine {
    transports: Mutex<Vec<Arc<LoopbackTransport>>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transports(&self) -> Vec<Arc<LoopbackTransport>> {
        self.transports.lock().clone()
    }

    /// The most recently created transport.
    pub fn current(&self) -> Option<Arc<LoopbackTransport>> {
        self.transports.lock().last().cloned()
    }

    /// Drive the connection state of the current transport.
    pub fn set_connection_state(&self, state: ConnectionState) -> bool {
        match self.current() {
            Some(transport) => {
                transport.set_connection_state(state);
                true
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl RtcEngine for LoopbackEngine {
    async fn create_send_transport(
        &self,
        options: &TransportOptions,
        _sendable: &RtpCapabilities,
    ) -> CastResult<Arc<dyn RtcTransport>> {
        let transport = Arc::new(LoopbackTransport::new(options.id.clone()));
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use classcast_platform_core::VideoFrame;

    use super::*;

    #[tokio::test]
    async fn test_sent_video_is_counted_and_replace_switches_source() {
        let transport = LoopbackTransport::new("t".into());
        let first = MediaTrack::new_video("first");
        let sender = transport
            .start_send(&first, &ProduceOptions::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        first.push_frame(VideoFrame::solid(4, 4, [1, 2, 3, 255], 0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.sender_stats()[0].frames, 1);

        let second = MediaTrack::new_video("second");
        transport.replace_track(&sender.local_id, &second).await.unwrap();
        assert_eq!(transport.sender_stats()[0].track_id, second.id());

        transport.close().await;
        assert!(transport.is_closed());
        assert!(transport.sender_stats()[0].stopped);
        assert_eq!(*transport.connection_state().borrow(), ConnectionState::Closed);
    }
}
