//! ClassCast Layout Engine
//!
//! Holds the mutable, versioned list of placement rules the compositor
//! replays every tick, and resolves default arrangements:
//! - **Picture-in-picture:** one full-frame main source, the rest stacked as
//!   small labeled squares along the right edge
//! - **Custom:** caller-supplied entries, drawn in ascending `z_index`
//!
//! This crate is pure computation: no I/O, no timers, no platform types.

pub mod engine;
pub mod pip;

pub use engine::{LayoutEngine, LayoutSnapshot};
pub use pip::{resolve_pip, source_label, PipGeometry};
