//! In-memory media router.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::TrackKind;
use classcast_publish::device::local_capabilities;
use classcast_publish::signaling::{
    serve_json_lines, METHOD_CAPABILITIES, METHOD_CONNECT_TRANSPORT, METHOD_CREATE_TRANSPORT,
    METHOD_PRODUCE,
};
use classcast_publish::{
    DtlsFingerprint, DtlsParameters, DtlsRole, JsonLineSignaling, RtpCapabilities, RtpParameters,
    SignalingChannel, TransportOptions,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// A producer registered with the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedRecord {
    pub id: String,
    pub transport_id: String,
    pub kind: String,
    pub session_id: String,
}

#[derive(Default)]
struct RouterState {
    transports: Vec<String>,
    connected: Vec<String>,
    producers: Vec<ProducedRecord>,
    failures: HashMap<String, usize>,
}

/// Router that accepts every well-formed request, with injectable failures.
pub struct SimRouter {
    capabilities: RtpCapabilities,
    state: Mutex<RouterState>,
    next_id: AtomicU64,
}

impl SimRouter {
    pub fn new() -> Self {
        Self::with_capabilities(local_capabilities())
    }

    pub fn with_capabilities(capabilities: RtpCapabilities) -> Self {
        Self {
            capabilities,
            state: Mutex::new(RouterState::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Reject the next `times` calls of `method`.
    pub fn fail_next(&self, method: &str, times: usize) {
        *self
            .state
            .lock()
            .failures
            .entry(method.to_string())
            .or_default() += times;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connected.len()
    }

    pub fn producers(&self) -> Vec<ProducedRecord> {
        self.state.lock().producers.clone()
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Answer one request. The router side of the signaling protocol.
    pub fn handle(&self, method: &str, data: Value) -> Result<Value, String> {
        let mut state = self.state.lock();
        if let Some(remaining) = state.failures.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(format!("{method} failed (simulated)"));
            }
        }

        match method {
            METHOD_CAPABILITIES => {
                serde_json::to_value(&self.capabilities).map_err(|e| e.to_string())
            }
            METHOD_CREATE_TRANSPORT => {
                let id = self.next("transport");
                state.transports.push(id.clone());
                let options = TransportOptions {
                    id,
                    ice_parameters: json!({ "usernameFragment": "sim", "password": "sim" }),
                    ice_candidates: Vec::new(),
                    dtls_parameters: DtlsParameters {
                        role: DtlsRole::Auto,
                        fingerprints: vec![DtlsFingerprint {
                            algorithm: "sha-256".into(),
                            value: "00:11:22:33".into(),
                        }],
                    },
                };
                serde_json::to_value(options).map_err(|e| e.to_string())
            }
            METHOD_CONNECT_TRANSPORT => {
                let id = field(&data, "transportId")?;
                if !state.transports.contains(&id) {
                    return Err(format!("unknown transport {id}"));
                }
                state.connected.push(id);
                Ok(Value::Null)
            }
            METHOD_PRODUCE => {
                let transport_id = field(&data, "transportId")?;
                if !state.connected.contains(&transport_id) {
                    return Err(format!("transport {transport_id} is not connected"));
                }
                let record = ProducedRecord {
                    id: self.next("producer"),
                    transport_id,
                    kind: field(&data, "kind")?,
                    session_id: data["appData"]["sessionId"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                };
                let id = record.id.clone();
                state.producers.push(record);
                Ok(json!({ "id": id }))
            }
            other => Err(format!("unknown method {other}")),
        }
    }

    /// A JSON-line signaling client wired to this router over an in-memory pipe.
    pub fn json_line_client(self: &Arc<Self>) -> JsonLineSignaling {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let router = self.clone();
        tokio::spawn(async move {
            let served =
                serve_json_lines(server, move |method, data| router.handle(method, data)).await;
            if let Err(e) = served {
                tracing::debug!(error = %e, "Simulated router connection ended");
            }
        });
        JsonLineSignaling::new(client)
    }
}

impl Default for SimRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn field(data: &Value, name: &str) -> Result<String, String> {
    data.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing field {name}"))
}

#[async_trait::async_trait]
impl SignalingChannel for SimRouter {
    async fn get_capabilities(&self) -> CastResult<RtpCapabilities> {
        let value = self.handle(METHOD_CAPABILITIES, Value::Null).map_err(CastError::signaling)?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create_send_transport(&self) -> CastResult<TransportOptions> {
        let value = self
            .handle(METHOD_CREATE_TRANSPORT, Value::Null)
            .map_err(CastError::signaling)?;
        Ok(serde_json::from_value(value)?)
    }

    async fn connect_transport(&self, transport_id: &str, dtls: &DtlsParameters) -> CastResult<()> {
        self.handle(
            METHOD_CONNECT_TRANSPORT,
            json!({ "transportId": transport_id, "dtlsParameters": dtls }),
        )
        .map_err(CastError::signaling)?;
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: TrackKind,
        rtp_parameters: &RtpParameters,
        session_id: &str,
    ) -> CastResult<String> {
        let value = self
            .handle(
                METHOD_PRODUCE,
                json!({
                    "transportId": transport_id,
                    "kind": kind,
                    "rtpParameters": rtp_parameters,
                    "appData": { "sessionId": session_id },
                }),
            )
            .map_err(CastError::signaling)?;
        value["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CastError::signaling("router returned no producer id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_produce_requires_connected_transport() {
        let router = SimRouter::new();
        let options = router.create_send_transport().await.unwrap();
        let params = RtpParameters {
            mid: None,
            codecs: Vec::new(),
            encodings: Vec::new(),
        };
        assert!(router
            .produce(&options.id, TrackKind::Video, &params, "s")
            .await
            .is_err());

        router
            .connect_transport(&options.id, &options.dtls_parameters)
            .await
            .unwrap();
        let id = router
            .produce(&options.id, TrackKind::Video, &params, "s")
            .await
            .unwrap();
        assert_eq!(router.producers()[0].id, id);
        assert_eq!(router.producers()[0].kind, "video");
        assert_eq!(router.producers()[0].session_id, "s");
    }

    #[tokio::test]
    async fn test_json_line_client_reaches_router() {
        let router = Arc::new(SimRouter::new());
        let client = router.json_line_client();
        let caps = client.get_capabilities().await.unwrap();
        assert_eq!(caps, local_capabilities());

        router.fail_next(METHOD_CREATE_TRANSPORT, 1);
        assert!(client.create_send_transport().await.is_err());
        assert!(client.create_send_transport().await.is_ok());
    }
}
