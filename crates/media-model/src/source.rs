//! Capture source identities and descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a capture source within a session.
///
/// Cameras are `camera:<device id>`; the single screen source is `screen`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn camera(device_id: &str) -> Self {
        Self(format!("camera:{device_id}"))
    }

    pub fn screen() -> Self {
        Self("screen".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What part of the display a screen capture covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScreenTarget {
    /// An entire monitor.
    Monitor { index: usize },
    /// A single application window.
    Window { id: String },
    /// A browser tab or other application-defined surface.
    Tab { id: String },
}

impl Default for ScreenTarget {
    fn default() -> Self {
        Self::Monitor { index: 0 }
    }
}

/// The origin of a video source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Camera { device_id: String },
    Screen { target: ScreenTarget },
}

impl SourceKind {
    /// Identifier used by layout entries to reference this source.
    pub fn id(&self) -> SourceId {
        match self {
            Self::Camera { device_id } => SourceId::camera(device_id),
            Self::Screen { .. } => SourceId::screen(),
        }
    }

    pub fn is_screen(&self) -> bool {
        matches!(self, Self::Screen { .. })
    }

    pub fn is_camera(&self) -> bool {
        matches!(self, Self::Camera { .. })
    }
}

/// Request to acquire one video source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,

    /// Also capture the audio of the shared surface (screen sources only).
    #[serde(default)]
    pub capture_audio: bool,
}

impl SourceDescriptor {
    pub fn camera(device_id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Camera {
                device_id: device_id.into(),
            },
            capture_audio: false,
        }
    }

    pub fn screen(target: ScreenTarget) -> Self {
        Self {
            kind: SourceKind::Screen { target },
            capture_audio: false,
        }
    }

    /// Request system audio together with a screen capture.
    pub fn with_audio(mut self) -> Self {
        self.capture_audio = self.kind.is_screen();
        self
    }

    pub fn id(&self) -> SourceId {
        self.kind.id()
    }
}

/// Request to acquire a microphone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicrophoneDescriptor {
    /// Specific device; `None` selects the system default.
    pub device_id: Option<String>,
}

/// Category of an enumerated capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Camera,
    Microphone,
    Screen,
}

/// An enumerated capture device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
    pub kind: DeviceKind,
}
