//! ClassCast Session Lifecycle
//!
//! [`StreamController`] owns the single active session. Every mutation goes
//! through its transition methods, serialized by one async mutex:
//!
//! ```text
//! start ─► acquire sources ─► mix audio ─► compositor ─► publish ─► record
//!   │            (any failure releases what was built, in reverse)
//!   ▼
//! supervise ─► source ended ─► reacquire + swap in place
//!           └► connection lost / swap failed ─► full restart after delay
//!   ▼
//! stop ─► recorder ─► publish ─► compositor ─► mixer ─► sources ─► upload
//! ```

pub mod backend;
pub mod controller;
mod resources;
pub mod state;
mod supervisor;

pub use backend::{LoggingSessionBackend, MemorySessionBackend, SessionBackend};
pub use controller::{Platform, PublishTarget, StreamController};
pub use state::{SessionState, SessionSummary, StartRequest};
