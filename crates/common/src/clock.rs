//! Clock and timing utilities.
//!
//! A streaming session is anchored to a monotonic epoch recorded when the
//! session starts. Frame and audio timestamps are nanoseconds relative to
//! that epoch; the wall-clock start time is kept for display and for the
//! session registration call.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Monotonic session clock with its wall-clock anchor.
#[derive(Debug, Clone)]
pub struct SessionClock {
    epoch: Instant,
    started_at: DateTime<Utc>,
}

impl SessionClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Nanoseconds elapsed since the session started.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Time elapsed since the session started.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Wall-clock start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Elapsed time formatted as `HH:MM:SS` for status displays.
    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed())
    }
}

/// Format a duration as `HH:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}

/// Frame rate controller used to drop frames arriving faster than a target.
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ns: 1_000_000_000 / target_hz.max(1) as u64,
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            _ => false,
        }
    }

    /// Target interval in nanoseconds.
    pub fn interval_ns(&self) -> u64 {
        self.target_interval_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = SessionClock::start();
        assert!(clock.elapsed_ns() < 1_000_000_000);
        assert!(clock.started_at() <= Utc::now());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn test_rate_controller() {
        let mut ctrl = RateController::new(15);
        assert!(ctrl.should_tick(0)); // first tick always fires
        assert!(!ctrl.should_tick(10_000_000)); // 10ms later, too soon
        assert!(ctrl.should_tick(67_000_000)); // ~67ms later (15Hz ~ 66.7ms)
    }
}
