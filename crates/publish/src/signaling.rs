//! Signaling with the media router.
//!
//! The [`SignalingChannel`] trait is the request/response surface the
//! publish pipeline needs. [`JsonLineSignaling`] implements it over any byte
//! stream using one JSON object per line:
//!
//! ```text
//! → {"id":1,"method":"getRouterRtpCapabilities","data":null}
//! ← {"id":1,"ok":true,"data":{"codecs":[...]}}
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::TrackKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::rtp::{DtlsParameters, RtpCapabilities, RtpParameters, TransportOptions};

pub const METHOD_CAPABILITIES: &str = "getRouterRtpCapabilities";
pub const METHOD_CREATE_TRANSPORT: &str = "createWebRtcTransport";
pub const METHOD_CONNECT_TRANSPORT: &str = "connectTransport";
pub const METHOD_PRODUCE: &str = "produce";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait::async_trait]
pub trait SignalingChannel: Send + Sync {
    /// The router's receive capabilities.
    async fn get_capabilities(&self) -> CastResult<RtpCapabilities>;

    /// Ask the router for a send transport.
    async fn create_send_transport(&self) -> CastResult<TransportOptions>;

    /// Forward the local DTLS parameters for a transport.
    async fn connect_transport(&self, transport_id: &str, dtls: &DtlsParameters) -> CastResult<()>;

    /// Register a producer; returns the router-assigned producer id.
    async fn produce(
        &self,
        transport_id: &str,
        kind: TrackKind,
        rtp_parameters: &RtpParameters,
        session_id: &str,
    ) -> CastResult<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<SignalResponse>>>,
    closed: AtomicBool,
}

/// Newline-delimited JSON signaling client.
pub struct JsonLineSignaling {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl JsonLineSignaling {
    /// Run the protocol over `stream`. Must be called inside a tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_responses(read_half, shared.clone()));
        Self {
            writer: tokio::sync::Mutex::new(Box::new(write_half)),
            shared,
            next_id: AtomicU64::new(0),
            timeout: DEFAULT_TIMEOUT,
            reader,
        }
    }

    pub async fn connect_tcp(addr: &str) -> CastResult<Self> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| CastError::signaling(format!("connect {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        tracing::info!(addr, "Signaling connected");
        Ok(Self::new(stream))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Send one request and wait for the matching response.
    pub async fn request(&self, method: &str, data: Value) -> CastResult<Value> {
        if self.is_closed() {
            return Err(CastError::signaling("connection closed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let mut line = serde_json::to_string(&SignalRequest {
            id,
            method: method.to_string(),
            data,
        })?;
        line.push('\n');

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.shared.pending.lock().remove(&id);
            return Err(CastError::signaling(format!("{method}: write failed: {e}")));
        }
        tracing::trace!(id, method, "Signaling request sent");

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(CastError::signaling(format!(
                    "{method}: connection closed before response"
                )))
            }
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                return Err(CastError::signaling(format!(
                    "{method}: no response within {:?}",
                    self.timeout
                )));
            }
        };

        if response.ok {
            Ok(response.data)
        } else {
            Err(CastError::signaling(format!(
                "{method} rejected: {}",
                response.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }
}

impl Drop for JsonLineSignaling {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_responses<R>(reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SignalResponse>(&line) {
                    Ok(response) => match shared.pending.lock().remove(&response.id) {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => tracing::debug!(id = response.id, "Unmatched signaling response"),
                    },
                    Err(e) => tracing::warn!(error = %e, "Malformed signaling message"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Signaling read failed");
                break;
            }
        }
    }
    shared.closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with an error.
    shared.pending.lock().clear();
    tracing::info!("Signaling connection closed");
}

#[async_trait::async_trait]
impl SignalingChannel for JsonLineSignaling {
    async fn get_capabilities(&self) -> CastResult<RtpCapabilities> {
        let data = self.request(METHOD_CAPABILITIES, Value::Null).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn create_send_transport(&self) -> CastResult<TransportOptions> {
        let data = self
            .request(METHOD_CREATE_TRANSPORT, json!({ "direction": "send" }))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn connect_transport(&self, transport_id: &str, dtls: &DtlsParameters) -> CastResult<()> {
        self.request(
            METHOD_CONNECT_TRANSPORT,
            json!({ "transportId": transport_id, "dtlsParameters": dtls }),
        )
        .await?;
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: TrackKind,
        rtp_parameters: &RtpParameters,
        session_id: &str,
    ) -> CastResult<String> {
        let data = self
            .request(
                METHOD_PRODUCE,
                json!({
                    "transportId": transport_id,
                    "kind": kind,
                    "rtpParameters": rtp_parameters,
                    "appData": { "sessionId": session_id },
                }),
            )
            .await?;
        data.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CastError::signaling("produce response carries no producer id"))
    }
}

/// Answer JSON-line requests on `stream` with `handler` until the peer hangs up.
///
/// The router side of [`JsonLineSignaling`]; used by local routers and tests.
pub async fn serve_json_lines<S, H>(stream: S, mut handler: H) -> CastResult<()>
where
    S: AsyncRead + AsyncWrite + Send,
    H: FnMut(&str, Value) -> Result<Value, String> + Send,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: SignalRequest = serde_json::from_str(&line)?;
        let response = match handler(&request.method, request.data) {
            Ok(data) => SignalResponse {
                id: request.id,
                ok: true,
                data,
                error: None,
            },
            Err(error) => SignalResponse {
                id: request.id,
                ok: false,
                data: Value::Null,
                error: Some(error),
            },
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        write_half.write_all(out.as_bytes()).await?;
        write_half.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::{DtlsRole, RtpCodecCapability};

    fn router(method: &str, data: Value) -> Result<Value, String> {
        match method {
            METHOD_CAPABILITIES => Ok(serde_json::to_value(RtpCapabilities {
                codecs: vec![RtpCodecCapability::video("video/VP8")],
            })
            .unwrap()),
            METHOD_CONNECT_TRANSPORT => Ok(Value::Null),
            METHOD_PRODUCE => Ok(json!({
                "id": format!("producer-{}", data["kind"].as_str().unwrap())
            })),
            other => Err(format!("unknown method {other}")),
        }
    }

    #[tokio::test]
    async fn test_requests_are_matched_to_responses() {
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(serve_json_lines(server, router));
        let signaling = JsonLineSignaling::new(client);

        let caps = signaling.get_capabilities().await.unwrap();
        assert_eq!(caps.codecs.len(), 1);

        let dtls = DtlsParameters {
            role: DtlsRole::Auto,
            fingerprints: Vec::new(),
        };
        signaling.connect_transport("t1", &dtls).await.unwrap();

        let params = RtpParameters {
            mid: None,
            codecs: caps.codecs,
            encodings: Vec::new(),
        };
        let id = signaling
            .produce("t1", TrackKind::Video, &params, "session-1")
            .await
            .unwrap();
        assert_eq!(id, "producer-video");
    }

    #[tokio::test]
    async fn test_rejected_requests_surface_as_signaling_errors() {
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(serve_json_lines(server, router));
        let signaling = JsonLineSignaling::new(client);

        let err = signaling.create_send_transport().await.unwrap_err();
        assert!(matches!(err, CastError::Signaling { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_hang_up_fails_pending_and_later_requests() {
        let (client, server) = tokio::io::duplex(4096);
        let signaling = JsonLineSignaling::new(client);
        drop(server);

        assert!(signaling.get_capabilities().await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(signaling.is_closed());
        assert!(signaling.get_capabilities().await.is_err());
    }

    #[tokio::test]
    async fn test_silent_router_times_out() {
        let (client, _server) = tokio::io::duplex(4096);
        let signaling = JsonLineSignaling::new(client).with_timeout(Duration::from_millis(50));
        let err = signaling.get_capabilities().await.unwrap_err();
        assert!(err.to_string().contains("no response"));
    }
}
