//! Synthetic test patterns.

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;

/// Stable background colour for a source key.
pub fn color_for(key: &str) -> [u8; 4] {
    let hash = key
        .bytes()
        .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
    let [r, g, b, _] = hash.to_le_bytes();
    // Keep every channel away from black so a drawn source is never
    // mistaken for the cleared canvas.
    [r | 0x40, g | 0x40, b | 0x40, 255]
}

/// Solid `color` background with a marker that moves with `frame_index`
/// along the top edge and a fixed marker in the centre.
pub fn test_pattern(width: u32, height: u32, color: [u8; 4], frame_index: u64) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(width, height, Rgba(color));
    let marker = (height / 8).max(2);

    let travel = width.saturating_sub(marker).max(1) as u64;
    let x = (frame_index * 8 % travel) as i32;
    draw_filled_rect_mut(
        &mut img,
        Rect::at(x, 0).of_size(marker, marker),
        Rgba([255, 255, 255, 255]),
    );

    draw_filled_circle_mut(
        &mut img,
        ((width / 2) as i32, (height / 2) as i32),
        (marker / 2) as i32,
        Rgba([20, 20, 20, 255]),
    );
    img
}
