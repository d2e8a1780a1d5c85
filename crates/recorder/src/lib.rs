//! ClassCast Local Recorder
//!
//! Records the composite video and mixed audio into one container blob.
//! The encoder runs behind [`RecorderBackend`]; this crate owns MIME
//! selection, chunk buffering and the stop sequence:
//!
//! ```text
//! request_stop ──► wait for final chunk ──(timeout)──► force_stop
//!                          │                               │
//!                          └────────► trailing wait ◄──────┘
//!                                          │
//!                                     assemble blob
//! ```

pub mod backend;
pub mod buffer;
pub mod recorder;

pub use backend::{GstRecorderBackend, RecorderBackend, RecorderControl, RecorderSession};
pub use buffer::ChunkBuffer;
pub use recorder::{select_mime_type, LocalRecorder, Recording, RecorderStats};
