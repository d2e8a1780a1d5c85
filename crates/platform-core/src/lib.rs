//! ClassCast platform core contracts.
//!
//! This crate contains the media runtime shared by capture, composition,
//! publishing and recording without coupling to a concrete capture or
//! transport backend:
//! - [`MediaTrack`]: a cloneable handle to one live audio or video track
//! - [`MediaStream`]: an ordered set of tracks
//! - [`VideoFrame`] / [`AudioChunk`]: decoded media payloads
//! - [`DecodeSink`]: hidden per-source frame reader used by the compositor

pub mod frame;
pub mod sink;
pub mod track;

pub use frame::*;
pub use sink::*;
pub use track::*;
