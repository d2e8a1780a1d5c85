//! ClassCast Publish Pipeline
//!
//! Sends the composite video track and the mixed audio track to a remote
//! media router (SFU).
//!
//! ```text
//!   negotiate()          open_transport()            produce(video/audio)
//! ┌──────────┐  caps   ┌──────────────┐  connect   ┌──────────────┐
//! │  Idle    │ ──────► │ Capabilities │ ─────────► │ TransportReady│ ──► Producing
//! └──────────┘         │  Negotiated  │  (lazily,  └──────────────┘
//!                      └──────────────┘  first produce)
//! ```
//!
//! The signaling protocol and the local WebRTC stack are behind the
//! [`SignalingChannel`] and [`RtcEngine`] traits.

pub mod device;
pub mod health;
pub mod pipeline;
pub mod producer;
pub mod rtp;
pub mod signaling;
pub mod transport;

pub use device::Device;
pub use health::{HealthEvent, HealthMonitor};
pub use pipeline::{PublishPipeline, PublishState, PublishedTracks};
pub use producer::Producer;
pub use rtp::*;
pub use signaling::{serve_json_lines, JsonLineSignaling, SignalingChannel};
pub use transport::{ConnectionState, LocalSender, RtcEngine, RtcTransport, SendTransport};
