//! Error types shared across ClassCast crates.

use std::fmt;

/// Why a capture device could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionCause {
    /// The user or the OS refused access.
    PermissionDenied,
    /// No device matches the requested identifier.
    DeviceNotFound,
    /// The device exists but another process holds it.
    DeviceBusy,
    /// The device cannot satisfy the requested resolution/frame rate.
    ConstraintsUnsatisfiable,
    /// Anything the backend could not classify.
    Other,
}

impl fmt::Display for AcquisitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PermissionDenied => "permission denied",
            Self::DeviceNotFound => "device not found",
            Self::DeviceBusy => "device busy",
            Self::ConstraintsUnsatisfiable => "constraints unsatisfiable",
            Self::Other => "capture failed",
        };
        f.write_str(text)
    }
}

/// Media kind of a failed track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndedTrack {
    Video,
    Audio,
}

impl fmt::Display for EndedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Top-level error type for ClassCast operations.
#[derive(Debug, thiserror::Error)]
pub enum CastError {
    #[error("Acquisition error ({cause}): {message}")]
    Acquisition {
        cause: AcquisitionCause,
        message: String,
    },

    #[error("Negotiation error: {message}")]
    Negotiation { message: String },

    #[error("Producer error: {message}")]
    Producer { message: String },

    #[error("{kind} track ended: {message}")]
    TrackEnded { kind: EndedTrack, message: String },

    #[error("Recording too small: {size} bytes (minimum {minimum})")]
    RecordingTooSmall { size: usize, minimum: usize },

    #[error("Unsupported recording format: none of [{candidates}] is supported")]
    UnsupportedFormat { candidates: String },

    #[error("Recorder error: {message}")]
    Recorder { message: String },

    #[error("Upload error: {message}")]
    Upload { message: String },

    #[error("Signaling error: {message}")]
    Signaling { message: String },

    #[error("A streaming session is already active")]
    SessionAlreadyActive,

    #[error("No streaming session is active")]
    NoActiveSession,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CastError.
pub type CastResult<T> = Result<T, CastError>;

impl CastError {
    pub fn acquisition(cause: AcquisitionCause, msg: impl Into<String>) -> Self {
        Self::Acquisition {
            cause,
            message: msg.into(),
        }
    }

    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::Negotiation {
            message: msg.into(),
        }
    }

    pub fn producer(msg: impl Into<String>) -> Self {
        Self::Producer {
            message: msg.into(),
        }
    }

    pub fn track_ended(kind: EndedTrack, msg: impl Into<String>) -> Self {
        Self::TrackEnded {
            kind,
            message: msg.into(),
        }
    }

    pub fn recorder(msg: impl Into<String>) -> Self {
        Self::Recorder {
            message: msg.into(),
        }
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload {
            message: msg.into(),
        }
    }

    pub fn signaling(msg: impl Into<String>) -> Self {
        Self::Signaling {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// The acquisition cause, if this is an acquisition failure.
    pub fn acquisition_cause(&self) -> Option<AcquisitionCause> {
        match self {
            Self::Acquisition { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upload { .. }
                | Self::Signaling { .. }
                | Self::Acquisition {
                    cause: AcquisitionCause::DeviceBusy,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_message_names_cause() {
        let err = CastError::acquisition(AcquisitionCause::DeviceBusy, "camera:usb-1");
        assert_eq!(
            err.to_string(),
            "Acquisition error (device busy): camera:usb-1"
        );
        assert_eq!(err.acquisition_cause(), Some(AcquisitionCause::DeviceBusy));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_recording_errors_are_terminal() {
        let err = CastError::RecordingTooSmall {
            size: 12,
            minimum: 1024,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("12 bytes"));
    }
}
