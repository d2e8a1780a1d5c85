//! Application configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CastError, CastResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Source capture constraints and retry policy.
    pub capture: CaptureConfig,

    /// Composite canvas and tick rate.
    pub compositor: CompositorConfig,

    /// Producer encodings and failure recovery timing.
    pub publish: PublishConfig,

    /// Local recording policy.
    pub recorder: RecorderConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Constraints requested from capture devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: u32,

    pub screen_width: u32,
    pub screen_height: u32,
    /// Ideal screen frame rate. Kept low to bound CPU and memory.
    pub screen_fps: u32,
    pub screen_max_fps: u32,

    /// How many times a busy device is retried before giving up.
    pub busy_retry_attempts: u32,
    pub busy_retry_delay_ms: u64,
}

/// Composite canvas configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,

    /// Composition frame rate (timer driven).
    pub target_fps: u32,

    /// White border thickness around every drawn source.
    pub border_px: u32,

    /// Height of the label strip at the bottom of every drawn source.
    pub label_strip_px: u32,

    /// Margin and gap between picture-in-picture squares.
    pub pip_margin_px: u32,

    /// PIP square edge as a fraction of the shorter canvas side.
    pub pip_fraction: f64,
}

/// Publish pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Video bitrates in bits per second.
    pub video_start_bitrate: u32,
    pub video_max_bitrate: u32,
    pub video_min_bitrate: u32,

    pub opus_stereo: bool,
    pub opus_fec: bool,

    /// Period of the producer/track health check.
    pub health_interval_ms: u64,

    /// Delay before a full session restart after a connection failure.
    pub restart_delay_ms: u64,
}

/// Local recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Ordered container/codec preferences.
    pub mime_preferences: Vec<String>,

    /// Chunk emission interval requested from the recorder backend.
    pub timeslice_ms: u64,

    /// Chunk count above which the oldest half of the buffer is dropped.
    pub max_buffered_chunks: usize,

    /// Wait for trailing chunks after the backend reports stop.
    pub trailing_wait_ms: u64,

    /// Graceful stop budget before the backend is force-stopped.
    pub force_stop_timeout_ms: u64,

    /// Recordings smaller than this are treated as corrupted.
    pub min_blob_bytes: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "classcast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_width: 1280,
            camera_height: 720,
            camera_fps: 30,
            screen_width: 1280,
            screen_height: 720,
            screen_fps: 15,
            screen_max_fps: 30,
            busy_retry_attempts: 3,
            busy_retry_delay_ms: 500,
        }
    }
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            canvas_width: 1280,
            canvas_height: 720,
            target_fps: 15,
            border_px: 2,
            label_strip_px: 24,
            pip_margin_px: 10,
            pip_fraction: 0.25,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            video_start_bitrate: 1_500_000,
            video_max_bitrate: 3_000_000,
            video_min_bitrate: 500_000,
            opus_stereo: true,
            opus_fec: true,
            health_interval_ms: 5_000,
            restart_delay_ms: 3_000,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mime_preferences: vec![
                "video/webm;codecs=vp8,opus".to_string(),
                "video/webm".to_string(),
                "video/mp4".to_string(),
            ],
            timeslice_ms: 1_000,
            max_buffered_chunks: 1_800,
            trailing_wait_ms: 500,
            force_stop_timeout_ms: 5_000,
            min_blob_bytes: 1_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl CaptureConfig {
    pub fn busy_retry_delay(&self) -> Duration {
        Duration::from_millis(self.busy_retry_delay_ms)
    }
}

impl CompositorConfig {
    /// Interval between composition ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.target_fps.max(1) as u64)
    }
}

impl PublishConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl RecorderConfig {
    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }

    pub fn trailing_wait(&self) -> Duration {
        Duration::from_millis(self.trailing_wait_ms)
    }

    pub fn force_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.force_stop_timeout_ms)
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> CastResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> CastResult<()> {
        if self.compositor.target_fps == 0 {
            return Err(CastError::config("compositor.target_fps must be positive"));
        }
        if self.compositor.canvas_width == 0 || self.compositor.canvas_height == 0 {
            return Err(CastError::config("compositor canvas must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.compositor.pip_fraction) {
            return Err(CastError::config(
                "compositor.pip_fraction must lie in [0, 1]",
            ));
        }
        if self.publish.video_min_bitrate > self.publish.video_max_bitrate {
            return Err(CastError::config(
                "publish.video_min_bitrate exceeds video_max_bitrate",
            ));
        }
        if self.recorder.mime_preferences.is_empty() {
            return Err(CastError::config("recorder.mime_preferences is empty"));
        }
        if self.recorder.max_buffered_chunks < 2 {
            return Err(CastError::config(
                "recorder.max_buffered_chunks must be at least 2",
            ));
        }
        Ok(())
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("classcast").join("config.json")
}
