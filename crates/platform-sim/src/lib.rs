//! Synthetic platform for ClassCast.
//!
//! Stand-ins for every external boundary of a session:
//! - [`SimCaptureBackend`]: test-pattern cameras and screens, tone
//!   microphones, with scriptable acquisition failures and track ends
//! - [`SimRouter`]: an in-memory media router speaking the signaling protocol
//! - [`LoopbackEngine`]: a WebRTC stack that consumes sent tracks locally
//! - [`MemoryRecorderBackend`]: a recorder producing deterministic chunks

pub mod capture;
pub mod pattern;
pub mod recorder;
pub mod router;
pub mod rtc;

pub use capture::{SimCaptureBackend, MICROPHONE_KEY};
pub use pattern::{color_for, test_pattern};
pub use recorder::MemoryRecorderBackend;
pub use router::SimRouter;
pub use rtc::{LoopbackEngine, SenderStats};
