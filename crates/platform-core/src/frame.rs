//! Decoded media payloads.

use std::sync::Arc;

use image::{Rgba, RgbaImage};

/// Sample rate every audio path in the pipeline runs at.
pub const SAMPLE_RATE: u32 = 48_000;

/// Channel count every audio path in the pipeline runs at.
pub const CHANNELS: u16 = 2;

/// One decoded RGBA video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    image: RgbaImage,
    /// Capture time in nanoseconds on the producer's clock.
    pub timestamp_ns: u64,
}

impl VideoFrame {
    pub fn new(image: RgbaImage, timestamp_ns: u64) -> Self {
        Self {
            image,
            timestamp_ns,
        }
    }

    /// Wrap a tightly packed RGBA buffer. Returns `None` on a size mismatch.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>, timestamp_ns: u64) -> Option<Self> {
        RgbaImage::from_raw(width, height, data).map(|image| Self::new(image, timestamp_ns))
    }

    /// A frame filled with a single color.
    pub fn solid(width: u32, height: u32, color: [u8; 4], timestamp_ns: u64) -> Self {
        Self::new(
            RgbaImage::from_pixel(width, height, Rgba(color)),
            timestamp_ns,
        )
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// A block of interleaved `f32` PCM samples.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp_ns: u64,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, timestamp_ns: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            timestamp_ns,
        }
    }

    /// `frames` sample frames of silence at the pipeline format.
    pub fn silence(frames: usize, timestamp_ns: u64) -> Self {
        Self::new(
            vec![0.0; frames * CHANNELS as usize],
            SAMPLE_RATE,
            CHANNELS,
            timestamp_ns,
        )
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Peak absolute amplitude.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Samples as interleaved stereo, duplicating mono input.
    pub fn to_stereo(&self) -> Vec<f32> {
        match self.channels {
            2 => self.samples.to_vec(),
            1 => self.samples.iter().flat_map(|s| [*s, *s]).collect(),
            n => self
                .samples
                .chunks(n as usize)
                .flat_map(|frame| [frame[0], frame.get(1).copied().unwrap_or(frame[0])])
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_rejects_short_buffers() {
        assert!(VideoFrame::from_rgba(2, 2, vec![0; 15], 0).is_none());
        assert!(VideoFrame::from_rgba(2, 2, vec![0; 16], 0).is_some());
    }

    #[test]
    fn test_mono_is_duplicated_to_stereo() {
        let chunk = AudioChunk::new(vec![0.1, 0.2], SAMPLE_RATE, 1, 0);
        assert_eq!(chunk.to_stereo(), vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(chunk.frames(), 2);
    }

    #[test]
    fn test_surround_is_folded_to_front_pair() {
        let chunk = AudioChunk::new(vec![0.1, 0.2, 0.9, 0.3, 0.4, 0.9], SAMPLE_RATE, 3, 0);
        assert_eq!(chunk.to_stereo(), vec![0.1, 0.2, 0.3, 0.4]);
    }
}
