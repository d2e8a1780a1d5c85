//! ClassCast Render Engine
//!
//! Live compositor that draws every enabled source onto one fixed-size
//! canvas at a fixed rate and exposes the canvas as a shareable video track.
//!
//! # Pipeline Architecture
//!
//! ```text
//! DecodeSink (camera 1) ──┐
//! DecodeSink (camera 2) ──┼── per tick, in z-order ──► Canvas 1280x720
//! DecodeSink (screen) ────┘         ▲                      │
//!                                   │                      ▼
//!                  LayoutEngine snapshot (versioned)   CompositeTrack
//!                                                      ├── lease: publish
//!                                                      └── lease: recorder
//! ```
//!
//! The tick is driven by a timer rather than a display refresh callback so
//! composition keeps running while the host window is hidden.

pub mod canvas;
pub mod compositor;
pub mod track;

pub use canvas::{Canvas, DrawStyle, LabelStrip};
pub use compositor::{Compositor, CompositorStats};
pub use track::{CompositeTrack, TrackLease};
