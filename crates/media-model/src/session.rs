//! Session mode and user-visible status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a session is doing with the composite stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Idle,
    Publishing,
    Recording,
    Both,
}

impl SessionMode {
    pub fn from_flags(publish: bool, record: bool) -> Self {
        match (publish, record) {
            (true, true) => Self::Both,
            (true, false) => Self::Publishing,
            (false, true) => Self::Recording,
            (false, false) => Self::Idle,
        }
    }

    pub fn publishes(&self) -> bool {
        matches!(self, Self::Publishing | Self::Both)
    }

    pub fn records(&self) -> bool {
        matches!(self, Self::Recording | Self::Both)
    }
}

/// Coarse state of a streaming session, rendered as the single status line
/// any UI can show without knowing internal error types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum StreamStatus {
    Idle,
    /// Opening a capture device; the payload names it ("camera", "screen").
    Acquiring(String),
    Connecting,
    Live,
    Recording,
    Reconnecting,
    /// A failure was detected and recovery is in progress.
    Retrying,
    Stopping,
    Stopped,
    /// Start or recovery failed for good.
    Failed(String),
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Acquiring(what) => write!(f, "acquiring {what}…"),
            Self::Connecting => f.write_str("connecting…"),
            Self::Live => f.write_str("live"),
            Self::Recording => f.write_str("recording"),
            Self::Reconnecting => f.write_str("reconnecting…"),
            Self::Retrying => f.write_str("stream error, retrying"),
            Self::Stopping => f.write_str("stopping…"),
            Self::Stopped => f.write_str("stopped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(SessionMode::from_flags(true, true), SessionMode::Both);
        assert!(SessionMode::Both.publishes() && SessionMode::Both.records());
        assert!(!SessionMode::Recording.publishes());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(
            StreamStatus::Acquiring("camera".into()).to_string(),
            "acquiring camera…"
        );
        assert_eq!(StreamStatus::Retrying.to_string(), "stream error, retrying");
    }
}
