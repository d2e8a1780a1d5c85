//! Session records: what to start, what is running, what came out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use classcast_common::error::{CastError, CastResult};
use classcast_media_model::{
    LayoutType, MicrophoneDescriptor, SessionMode, SourceDescriptor, SourceId, StreamStatus,
};
use classcast_recorder::Recording;
use serde::Serialize;

/// Parameters of a `start` call.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub session_id: String,
    pub sources: Vec<SourceDescriptor>,
    pub microphone: Option<MicrophoneDescriptor>,
    pub layout_type: LayoutType,
    pub publish: bool,
    pub record: bool,
}

impl StartRequest {
    /// A publishing session with no sources yet.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            sources: Vec::new(),
            microphone: None,
            layout_type: LayoutType::Pip,
            publish: true,
            record: false,
        }
    }

    pub fn with_source(mut self, source: SourceDescriptor) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_microphone(mut self, microphone: MicrophoneDescriptor) -> Self {
        self.microphone = Some(microphone);
        self
    }

    pub fn with_layout(mut self, layout_type: LayoutType) -> Self {
        self.layout_type = layout_type;
        self
    }

    pub fn publish(mut self, enabled: bool) -> Self {
        self.publish = enabled;
        self
    }

    pub fn record(mut self, enabled: bool) -> Self {
        self.record = enabled;
        self
    }

    pub fn mode(&self) -> SessionMode {
        SessionMode::from_flags(self.publish, self.record)
    }

    /// Status shown once the session is up.
    pub(crate) fn running_status(&self) -> StreamStatus {
        if self.publish {
            StreamStatus::Live
        } else {
            StreamStatus::Recording
        }
    }

    pub(crate) fn validate(&self) -> CastResult<()> {
        if self.session_id.trim().is_empty() {
            return Err(CastError::config("session id must not be empty"));
        }
        if self.sources.is_empty() {
            return Err(CastError::config("at least one video source is required"));
        }
        if self.mode() == SessionMode::Idle {
            return Err(CastError::config(
                "a session must publish, record, or both",
            ));
        }
        Ok(())
    }
}

/// Snapshot of the active session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub session_id: String,
    pub mode: SessionMode,
    pub layout_type: LayoutType,
    pub sources: Vec<SourceId>,
    pub microphone: bool,
    /// Id of the composite video track.
    pub composite_track: String,
    /// Producer ids assigned by the router.
    pub producers: Vec<String>,
    /// Container chosen by the recorder.
    pub recording_mime: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Full restarts since the user called `start`.
    pub restarts: u32,
    /// Degradations the session continued through.
    pub warnings: Vec<String>,
}

/// What `stop` hands back.
#[derive(Debug)]
pub struct SessionSummary {
    pub state: SessionState,
    pub duration: Duration,
    /// `None` when the session did not record.
    pub recording: Option<CastResult<Recording>>,
    /// Upload outcome, present when a recording was produced.
    pub upload: Option<CastResult<String>>,
}

impl SessionSummary {
    pub fn recording(&self) -> Option<&Recording> {
        self.recording.as_ref().and_then(|r| r.as_ref().ok())
    }

    pub fn upload_location(&self) -> Option<&str> {
        self.upload
            .as_ref()
            .and_then(|r| r.as_ref().ok())
            .map(String::as_str)
    }
}
