//! Constraints requested from capture devices.

use serde::{Deserialize, Serialize};

/// Resolution and frame rate preferences for a video capture.
///
/// `ideal` values are hints the device may deviate from; `max_frame_rate`
/// is a hard ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub ideal_width: Option<u32>,
    pub ideal_height: Option<u32>,
    pub ideal_frame_rate: Option<u32>,
    pub max_frame_rate: Option<u32>,
}

impl CaptureConstraints {
    pub fn ideal(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            ideal_width: Some(width),
            ideal_height: Some(height),
            ideal_frame_rate: Some(frame_rate),
            max_frame_rate: None,
        }
    }

    pub fn with_max_frame_rate(mut self, max: u32) -> Self {
        self.max_frame_rate = Some(max);
        self
    }

    /// Drop the resolution preference, keeping frame rate limits.
    ///
    /// Used as the fallback when a device rejects the preferred resolution.
    pub fn relaxed(&self) -> Self {
        Self {
            ideal_width: None,
            ideal_height: None,
            ideal_frame_rate: self.ideal_frame_rate,
            max_frame_rate: self.max_frame_rate,
        }
    }

    pub fn is_relaxed(&self) -> bool {
        self.ideal_width.is_none() && self.ideal_height.is_none()
    }

    /// Frame rate a capture should be throttled to.
    pub fn effective_frame_rate(&self) -> u32 {
        let ideal = self.ideal_frame_rate.unwrap_or(30);
        match self.max_frame_rate {
            Some(max) => ideal.min(max).max(1),
            None => ideal.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relaxed_keeps_rate_limits() {
        let c = CaptureConstraints::ideal(1280, 720, 15).with_max_frame_rate(30);
        let r = c.relaxed();
        assert!(r.is_relaxed());
        assert_eq!(r.ideal_frame_rate, Some(15));
        assert_eq!(r.max_frame_rate, Some(30));
    }

    #[test]
    fn test_effective_rate_respects_ceiling() {
        let c = CaptureConstraints::ideal(1280, 720, 60).with_max_frame_rate(30);
        assert_eq!(c.effective_frame_rate(), 30);
        assert_eq!(CaptureConstraints::ideal(640, 480, 15).effective_frame_rate(), 15);
    }
}
