//! Synthetic capture devices.

use std::collections::{HashMap, VecDeque};
use std::f32::consts::TAU;
use std::time::Duration;

use classcast_capture_engine::CaptureBackend;
use classcast_common::error::{AcquisitionCause, CastError, CastResult};
use classcast_media_model::{CaptureConstraints, DeviceInfo, DeviceKind, ScreenTarget, SourceId};
use classcast_platform_core::{
    AudioChunk, MediaStream, MediaTrack, VideoFrame, CHANNELS, SAMPLE_RATE,
};
use parking_lot::Mutex;

use crate::pattern::{color_for, test_pattern};

/// Script key for the microphone. Cameras and screens use their source id.
pub const MICROPHONE_KEY: &str = "microphone";

const TONE_CHUNK: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Script {
    next_failures: HashMap<String, VecDeque<AcquisitionCause>>,
    permanent_failures: HashMap<String, AcquisitionCause>,
    live: HashMap<String, Vec<MediaTrack>>,
    opens: HashMap<String, usize>,
}

/// Capture backend producing test patterns and tones.
pub struct SimCaptureBackend {
    devices: Vec<DeviceInfo>,
    camera_size: (u32, u32),
    screen_size: (u32, u32),
    screen_audio: bool,
    script: Mutex<Script>,
}

impl SimCaptureBackend {
    /// Two cameras, one microphone, one screen.
    pub fn new() -> Self {
        let device = |id: &str, label: &str, kind| DeviceInfo {
            device_id: id.to_string(),
            label: label.to_string(),
            kind,
        };
        Self {
            devices: vec![
                device("cam0", "Synthetic Camera 0", DeviceKind::Camera),
                device("cam1", "Synthetic Camera 1", DeviceKind::Camera),
                device("mic0", "Synthetic Microphone", DeviceKind::Microphone),
                device("screen", "Synthetic Screen", DeviceKind::Screen),
            ],
            camera_size: (320, 240),
            screen_size: (640, 360),
            screen_audio: true,
            script: Mutex::new(Script::default()),
        }
    }

    pub fn with_frame_sizes(mut self, camera: (u32, u32), screen: (u32, u32)) -> Self {
        self.camera_size = camera;
        self.screen_size = screen;
        self
    }

    /// Screens never offer an audio track.
    pub fn without_screen_audio(mut self) -> Self {
        self.screen_audio = false;
        self
    }

    /// Fail the next open of `key` with `cause`. Calls queue up.
    pub fn fail_next(&self, key: &str, cause: AcquisitionCause) {
        self.script
            .lock()
            .next_failures
            .entry(key.to_string())
            .or_default()
            .push_back(cause);
    }

    /// Fail every open of `key` until [`SimCaptureBackend::clear_failures`].
    pub fn fail_always(&self, key: &str, cause: AcquisitionCause) {
        self.script
            .lock()
            .permanent_failures
            .insert(key.to_string(), cause);
    }

    pub fn clear_failures(&self, key: &str) {
        let mut script = self.script.lock();
        script.next_failures.remove(key);
        script.permanent_failures.remove(key);
    }

    /// End every live track opened for `key`, as if the device vanished.
    pub fn end_source(&self, key: &str) -> usize {
        let tracks = self.script.lock().live.remove(key).unwrap_or_default();
        let ended = tracks.iter().filter(|t| t.end()).count();
        tracing::info!(key, ended, "Simulated source end");
        ended
    }

    /// How many times `key` was opened successfully.
    pub fn open_count(&self, key: &str) -> usize {
        self.script.lock().opens.get(key).copied().unwrap_or(0)
    }

    /// Live tracks currently open for `key`.
    pub fn live_tracks(&self, key: &str) -> Vec<MediaTrack> {
        self.script
            .lock()
            .live
            .get(key)
            .map(|tracks| tracks.iter().filter(|t| t.is_live()).cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self, key: &str) -> CastResult<()> {
        let mut script = self.script.lock();
        let queued = script.next_failures.get_mut(key).and_then(VecDeque::pop_front);
        let scripted = queued.or_else(|| script.permanent_failures.get(key).copied());
        match scripted {
            Some(cause) => {
                tracing::debug!(key, %cause, "Simulated acquisition failure");
                Err(CastError::acquisition(cause, format!("{key}: simulated {cause}")))
            }
            None => Ok(()),
        }
    }

    fn register(&self, key: &str, tracks: &[MediaTrack]) {
        let mut script = self.script.lock();
        *script.opens.entry(key.to_string()).or_default() += 1;
        script
            .live
            .entry(key.to_string())
            .or_default()
            .extend(tracks.iter().cloned());
    }
}

impl Default for SimCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_size(constraints: &CaptureConstraints, fallback: (u32, u32)) -> (u32, u32) {
    // Honour the aspect ratio of the request at the simulated scale.
    match (constraints.ideal_width, constraints.ideal_height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => {
            let width = fallback.0;
            let height = ((width as u64 * h as u64) / w as u64).max(1) as u32;
            (width, height)
        }
        _ => fallback,
    }
}

fn spawn_pattern(track: &MediaTrack, key: &str, size: (u32, u32), fps: u32) {
    let track = track.clone();
    let color = color_for(key);
    let period = Duration::from_nanos(1_000_000_000 / fps.max(1) as u64);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut index: u64 = 0;
        loop {
            interval.tick().await;
            let image = test_pattern(size.0, size.1, color, index);
            let timestamp_ns = index * period.as_nanos() as u64;
            if !track.push_frame(VideoFrame::new(image, timestamp_ns)) {
                break;
            }
            index += 1;
        }
    });
}

fn spawn_tone(track: &MediaTrack, frequency: f32) {
    let track = track.clone();
    tokio::spawn(async move {
        let frames = (SAMPLE_RATE as u128 * TONE_CHUNK.as_millis() / 1000) as usize;
        let mut interval = tokio::time::interval(TONE_CHUNK);
        let mut position: u64 = 0;
        loop {
            interval.tick().await;
            let mut samples = Vec::with_capacity(frames * CHANNELS as usize);
            for i in 0..frames as u64 {
                let t = (position + i) as f32 / SAMPLE_RATE as f32;
                let value = 0.2 * (TAU * frequency * t).sin();
                samples.extend(std::iter::repeat(value).take(CHANNELS as usize));
            }
            let timestamp_ns = position * 1_000_000_000 / SAMPLE_RATE as u64;
            if !track.push_audio(AudioChunk::new(samples, SAMPLE_RATE, CHANNELS, timestamp_ns)) {
                break;
            }
            position += frames as u64;
        }
    });
}

#[async_trait::async_trait]
impl CaptureBackend for SimCaptureBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn list_devices(&self) -> CastResult<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    async fn open_camera(
        &self,
        device_id: &str,
        constraints: &CaptureConstraints,
    ) -> CastResult<MediaStream> {
        let key = SourceId::camera(device_id).to_string();
        self.check(&key)?;
        if !self
            .devices
            .iter()
            .any(|d| d.kind == DeviceKind::Camera && d.device_id == device_id)
        {
            return Err(CastError::acquisition(
                AcquisitionCause::DeviceNotFound,
                format!("no camera '{device_id}'"),
            ));
        }

        let track = MediaTrack::new_video(format!("sim camera {device_id}"));
        spawn_pattern(
            &track,
            &key,
            frame_size(constraints, self.camera_size),
            constraints.effective_frame_rate(),
        );
        self.register(&key, std::slice::from_ref(&track));
        Ok(MediaStream::from_tracks([track]))
    }

    async fn open_screen(
        &self,
        _target: &ScreenTarget,
        constraints: &CaptureConstraints,
        with_audio: bool,
    ) -> CastResult<MediaStream> {
        let key = SourceId::screen().to_string();
        self.check(&key)?;

        let video = MediaTrack::new_video("sim screen");
        spawn_pattern(
            &video,
            &key,
            frame_size(constraints, self.screen_size),
            constraints.effective_frame_rate(),
        );
        let mut tracks = vec![video];
        if with_audio && self.screen_audio {
            let audio = MediaTrack::new_audio("sim screen audio");
            spawn_tone(&audio, 220.0);
            tracks.push(audio);
        }
        self.register(&key, &tracks);
        Ok(MediaStream::from_tracks(tracks))
    }

    async fn open_microphone(&self, device_id: Option<&str>) -> CastResult<MediaTrack> {
        self.check(MICROPHONE_KEY)?;
        if let Some(id) = device_id {
            if !self
                .devices
                .iter()
                .any(|d| d.kind == DeviceKind::Microphone && d.device_id == id)
            {
                return Err(CastError::acquisition(
                    AcquisitionCause::DeviceNotFound,
                    format!("no microphone '{id}'"),
                ));
            }
        }
        let track = MediaTrack::new_audio("sim microphone");
        spawn_tone(&track, 440.0);
        self.register(MICROPHONE_KEY, std::slice::from_ref(&track));
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_camera_produces_frames_until_ended() {
        let backend = SimCaptureBackend::new();
        let stream = backend
            .open_camera("cam0", &CaptureConstraints::ideal(1280, 720, 30))
            .await
            .unwrap();
        let track = stream.first_video().unwrap().clone();
        let mut frames = track.subscribe_frames().unwrap();
        tokio::time::timeout(Duration::from_secs(2), frames.changed())
            .await
            .unwrap()
            .unwrap();
        let frame = track.latest_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (320, 180));

        assert_eq!(backend.end_source("camera:cam0"), 1);
        assert!(!track.is_live());
        assert!(backend.live_tracks("camera:cam0").is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let backend = SimCaptureBackend::new();
        backend.fail_next("camera:cam0", AcquisitionCause::DeviceBusy);
        let constraints = CaptureConstraints::ideal(640, 480, 15);

        let err = backend.open_camera("cam0", &constraints).await.unwrap_err();
        assert_eq!(err.acquisition_cause(), Some(AcquisitionCause::DeviceBusy));
        assert!(backend.open_camera("cam0", &constraints).await.is_ok());
        assert_eq!(backend.open_count("camera:cam0"), 1);
    }

    #[tokio::test]
    async fn test_screen_audio_is_optional() {
        let backend = SimCaptureBackend::new().without_screen_audio();
        let stream = backend
            .open_screen(&ScreenTarget::default(), &CaptureConstraints::ideal(1280, 720, 15), true)
            .await
            .unwrap();
        assert_eq!(stream.audio_tracks().count(), 0);
        stream.stop_all();
    }

    #[tokio::test]
    async fn test_denied_microphone_reports_cause() {
        let backend = SimCaptureBackend::new();
        backend.fail_always(MICROPHONE_KEY, AcquisitionCause::PermissionDenied);
        let err = backend.open_microphone(None).await.unwrap_err();
        assert_eq!(err.acquisition_cause(), Some(AcquisitionCause::PermissionDenied));
        backend.clear_failures(MICROPHONE_KEY);
        assert!(backend.open_microphone(Some("mic0")).await.is_ok());
    }
}
