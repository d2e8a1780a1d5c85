//! Fixed-size RGBA drawing surface.

use classcast_media_model::PixelRect;
use classcast_platform_core::VideoFrame;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
const BORDER: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Label strips darken the underlying pixels to this fraction.
const STRIP_SHADE: f32 = 0.4;

/// Decoration applied around every drawn source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawStyle {
    pub border_px: u32,
    pub label_strip_px: u32,
}

impl Default for DrawStyle {
    fn default() -> Self {
        Self {
            border_px: 2,
            label_strip_px: 24,
        }
    }
}

/// The part of `frame` that lands inside `visible` when the whole frame is
/// scaled onto `rect`, as `(x, y, width, height)` in frame pixels.
fn source_window(
    frame: &VideoFrame,
    rect: PixelRect,
    visible: PixelRect,
) -> (u32, u32, u32, u32) {
    let axis = |size: u32, start: i64, len: u32, vis_start: i64, vis_len: u32| {
        let scale = size as f64 / len as f64;
        let from = ((vis_start - start) as f64 * scale).floor();
        let to = ((vis_start - start + vis_len as i64) as f64 * scale).ceil();
        let from = (from.max(0.0) as u32).min(size.saturating_sub(1));
        let to = (to as u32).clamp(from + 1, size.max(1));
        (from, to - from)
    };
    let (x, w) = axis(frame.width(), rect.x, rect.width, visible.x, visible.width);
    let (y, h) = axis(frame.height(), rect.y, rect.height, visible.y, visible.height);
    (x, y, w, h)
}

/// A label placed on the canvas during the last paint.
///
/// The strip itself is painted into the pixels; the text travels alongside
/// the frame for consumers that render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelStrip {
    pub text: String,
    pub rect: PixelRect,
}

pub struct Canvas {
    image: RgbaImage,
    labels: Vec<LabelStrip>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, BACKGROUND),
            labels: Vec::new(),
        }
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

    pub fn labels(&self) -> &[LabelStrip] {
        &self.labels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    /// Fill with opaque black and forget the previous labels.
    pub fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = BACKGROUND;
        }
        self.labels.clear();
    }

    /// Scale `frame` into `rect` and decorate it.
    ///
    /// `rect` may extend past the canvas; only the visible part is touched.
    /// Returns `false` when nothing of `rect` is visible.
    pub fn draw_source(
        &mut self,
        frame: &VideoFrame,
        rect: PixelRect,
        label: &str,
        style: DrawStyle,
    ) -> bool {
        let Some(visible) = rect.clip(self.width(), self.height()) else {
            return false;
        };
        if frame.width() == 0 || frame.height() == 0 {
            return false;
        }

        let (src_x, src_y, src_w, src_h) = source_window(frame, rect, visible);
        let part = imageops::crop_imm(frame.image(), src_x, src_y, src_w, src_h).to_image();
        if part.dimensions() == (visible.width, visible.height) {
            imageops::replace(&mut self.image, &part, visible.x, visible.y);
        } else {
            let scaled =
                imageops::resize(&part, visible.width, visible.height, FilterType::Triangle);
            imageops::replace(&mut self.image, &scaled, visible.x, visible.y);
        }

        self.label_strip(visible, label, style.label_strip_px);
        self.stroke(visible, style.border_px);
        true
    }

    fn stroke(&mut self, rect: PixelRect, thickness: u32) {
        let t = thickness.min(rect.width / 2).min(rect.height / 2);
        if t == 0 {
            return;
        }
        let (x, y) = (rect.x as u32, rect.y as u32);
        let (w, h) = (rect.width, rect.height);
        self.fill(x, y, w, t);
        self.fill(x, y + h - t, w, t);
        self.fill(x, y + t, t, h - 2 * t);
        self.fill(x + w - t, y + t, t, h - 2 * t);
    }

    fn fill(&mut self, x0: u32, y0: u32, width: u32, height: u32) {
        for y in y0..y0 + height {
            for x in x0..x0 + width {
                self.image.put_pixel(x, y, BORDER);
            }
        }
    }

    fn label_strip(&mut self, rect: PixelRect, text: &str, strip_px: u32) {
        let height = strip_px.min(rect.height);
        if height == 0 {
            return;
        }
        let strip = PixelRect {
            x: rect.x,
            y: rect.bottom() - height as i64,
            width: rect.width,
            height,
        };
        let (x0, y0) = (strip.x as u32, strip.y as u32);
        for y in y0..y0 + strip.height {
            for x in x0..x0 + strip.width {
                let pixel = self.image.get_pixel_mut(x, y);
                for channel in &mut pixel.0[..3] {
                    *channel = (*channel as f32 * STRIP_SHADE) as u8;
                }
            }
        }
        self.labels.push(LabelStrip {
            text: text.to_string(),
            rect: strip,
        });
    }

    /// Copy the current pixels into a frame.
    pub fn to_frame(&self, timestamp_ns: u64) -> VideoFrame {
        VideoFrame::new(self.image.clone(), timestamp_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];

    fn rect(x: i64, y: i64, width: u32, height: u32) -> PixelRect {
        PixelRect { x, y, width, height }
    }

    #[test]
    fn test_new_canvas_is_black() {
        let canvas = Canvas::new(64, 36);
        assert_eq!(canvas.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(canvas.pixel(63, 35), [0, 0, 0, 255]);
    }

    #[test]
    fn test_source_is_scaled_bordered_and_labelled() {
        let mut canvas = Canvas::new(100, 100);
        let frame = VideoFrame::solid(10, 10, RED, 0);
        let style = DrawStyle {
            border_px: 2,
            label_strip_px: 10,
        };
        assert!(canvas.draw_source(&frame, rect(20, 20, 50, 50), "Kamera 1", style));

        assert_eq!(canvas.pixel(20, 20), [255, 255, 255, 255]);
        assert_eq!(canvas.pixel(40, 30), RED);
        // Inside the strip, red is shaded.
        assert_eq!(canvas.pixel(40, 65), [102, 0, 0, 255]);
        assert_eq!(canvas.pixel(10, 10), [0, 0, 0, 255]);

        assert_eq!(canvas.labels().len(), 1);
        assert_eq!(canvas.labels()[0].text, "Kamera 1");
        assert_eq!(canvas.labels()[0].rect, rect(20, 60, 50, 10));
    }

    #[test]
    fn test_off_canvas_parts_are_clipped() {
        let mut canvas = Canvas::new(100, 100);
        let frame = VideoFrame::solid(8, 8, RED, 0);
        let style = DrawStyle {
            border_px: 2,
            label_strip_px: 5,
        };
        assert!(canvas.draw_source(&frame, rect(80, 80, 40, 40), "x", style));
        assert_eq!(canvas.pixel(99, 99), [255, 255, 255, 255]);
        assert_eq!(canvas.pixel(90, 85), RED);
        assert_eq!(canvas.labels()[0].rect, rect(80, 95, 20, 5));

        assert!(!canvas.draw_source(&frame, rect(200, 0, 10, 10), "x", style));
    }

    #[test]
    fn test_clear_resets_pixels_and_labels() {
        let mut canvas = Canvas::new(32, 32);
        let frame = VideoFrame::solid(32, 32, RED, 0);
        canvas.draw_source(&frame, rect(0, 0, 32, 32), "x", DrawStyle::default());
        canvas.clear();
        assert_eq!(canvas.pixel(16, 4), [0, 0, 0, 255]);
        assert!(canvas.labels().is_empty());
    }

    #[test]
    fn test_oversized_rect_scales_only_the_visible_part() {
        let mut canvas = Canvas::new(100, 100);
        // Left half red, right half blue.
        let mut image = RgbaImage::from_pixel(10, 10, Rgba(RED));
        for y in 0..10 {
            for x in 5..10 {
                image.put_pixel(x, y, Rgba([0, 0, 255, 255]));
            }
        }
        let frame = VideoFrame::new(image, 0);
        let style = DrawStyle {
            border_px: 1,
            label_strip_px: 0,
        };

        // Only the top-left hundredth of a 10000 px square is visible.
        assert!(canvas.draw_source(&frame, rect(0, 0, 10_000, 10_000), "x", style));
        assert_eq!(canvas.pixel(0, 0), [255, 255, 255, 255]);
        assert_eq!(canvas.pixel(50, 50), RED);
        assert_eq!(canvas.pixel(98, 98), RED);

        // Shifted left by half its width, the blue half fills the canvas.
        canvas.clear();
        assert!(canvas.draw_source(&frame, rect(-100, 0, 200, 100), "x", style));
        assert_eq!(canvas.pixel(50, 50), [0, 0, 255, 255]);
    }

    #[test]
    fn test_border_covers_only_the_edges() {
        let mut canvas = Canvas::new(40, 40);
        let frame = VideoFrame::solid(40, 40, RED, 0);
        let style = DrawStyle {
            border_px: 3,
            label_strip_px: 0,
        };
        canvas.draw_source(&frame, rect(0, 0, 40, 40), "x", style);
        for (x, y) in [(0, 0), (2, 20), (39, 39), (37, 5), (20, 38)] {
            assert_eq!(canvas.pixel(x, y), [255, 255, 255, 255], "({x}, {y})");
        }
        for (x, y) in [(3, 3), (20, 20), (36, 36)] {
            assert_eq!(canvas.pixel(x, y), RED, "({x}, {y})");
        }
    }
}
