//! ClassCast Capture Engine
//!
//! Obtains the raw media a session composes and publishes:
//! cameras and screens become [`Source`]s carrying a hidden decode sink,
//! microphones and screen audio are combined by the [`AudioMixer`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               SourceAcquirer                 │
//! │  camera ──┐                                  │
//! │  screen ──┼──► CaptureBackend ──► MediaStream│
//! │  mic ─────┘    (GStreamer / synthetic)       │
//! └───────┬───────────────────────────┬──────────┘
//!         │ video                     │ audio
//!         ▼                           ▼
//!   Source + DecodeSink         AudioMixer (graph)
//!         │                           │
//!         ▼                           ▼
//!     Compositor                single mixed track
//! ```

pub mod acquire;
pub mod backend;
pub mod mixer;

pub use acquire::*;
pub use backend::CaptureBackend;
pub use mixer::AudioMixer;
