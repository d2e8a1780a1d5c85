//! Layout entries: where each source is drawn on the composite canvas.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::source::SourceId;

/// Placement of one source on the composite frame.
///
/// Geometry is in percent of the canvas. Entries that extend past the
/// canvas edge are accepted and clipped when drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutEntry {
    pub source_id: SourceId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Draw order; lower values are drawn first.
    pub z_index: i32,
    pub enabled: bool,
    pub label: String,
}

impl LayoutEntry {
    /// An enabled entry covering the whole canvas.
    pub fn full_frame(source_id: SourceId, label: impl Into<String>) -> Self {
        Self {
            source_id,
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            z_index: 0,
            enabled: true,
            label: label.into(),
        }
    }

    /// Whether the entry stays inside the canvas (`x+width<=100`, `y+height<=100`).
    pub fn is_within_bounds(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.width <= 100.0
            && self.y + self.height <= 100.0
    }

    /// Convert to pixel bounds for a canvas of the given size.
    ///
    /// Coordinates are clamped to a few canvas sizes around the canvas, so
    /// huge entries stay cheap to clip. Non-finite geometry yields an empty
    /// rectangle.
    pub fn to_pixels(&self, canvas_width: u32, canvas_height: u32) -> PixelRect {
        let geometry = [self.x, self.y, self.width, self.height];
        if geometry.iter().any(|v| v.is_nan()) {
            return PixelRect::default();
        }
        let cw = canvas_width as f64;
        let ch = canvas_height as f64;
        let bound = PIXEL_REACH * cw.max(ch);
        let pixels = |percent: f64, side: f64, min: f64| {
            (percent / 100.0 * side).round().clamp(min, bound)
        };
        PixelRect {
            x: pixels(self.x, cw, -bound) as i64,
            y: pixels(self.y, ch, -bound) as i64,
            width: pixels(self.width, cw, 0.0) as u32,
            height: pixels(self.height, ch, 0.0) as u32,
        }
    }

    /// Whether two entries place the same source at the same geometry and order.
    pub fn same_placement(&self, other: &LayoutEntry) -> bool {
        self.source_id == other.source_id
            && self.z_index == other.z_index
            && self.enabled == other.enabled
            && (self.x - other.x).abs() < 1e-9
            && (self.y - other.y).abs() < 1e-9
            && (self.width - other.width).abs() < 1e-9
            && (self.height - other.height).abs() < 1e-9
    }
}

/// How far, in canvas sizes, converted entries may reach past the canvas.
const PIXEL_REACH: f64 = 4.0;

/// Pixel rectangle, possibly extending beyond the canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn right(&self) -> i64 {
        self.x.saturating_add(self.width as i64)
    }

    pub fn bottom(&self) -> i64 {
        self.y.saturating_add(self.height as i64)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection with the canvas `[0, width) x [0, height)`.
    pub fn clip(&self, canvas_width: u32, canvas_height: u32) -> Option<PixelRect> {
        let left = self.x.max(0);
        let top = self.y.max(0);
        let right = self.right().min(canvas_width as i64);
        let bottom = self.bottom().min(canvas_height as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(PixelRect {
            x: left,
            y: top,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

/// Layout resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutType {
    /// One full-frame main source with the rest as small overlays.
    #[default]
    Pip,
    /// Caller-supplied explicit entries.
    Custom,
}

impl fmt::Display for LayoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pip => f.write_str("pip"),
            Self::Custom => f.write_str("custom"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown layout type '{0}' (expected 'pip' or 'custom')")]
pub struct ParseLayoutTypeError(String);

impl FromStr for LayoutType {
    type Err = ParseLayoutTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pip" => Ok(Self::Pip),
            "custom" => Ok(Self::Custom),
            _ => Err(ParseLayoutTypeError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(x: f64, y: f64, w: f64, h: f64) -> LayoutEntry {
        LayoutEntry {
            source_id: SourceId::screen(),
            x,
            y,
            width: w,
            height: h,
            z_index: 0,
            enabled: true,
            label: String::new(),
        }
    }

    #[test]
    fn test_percent_to_pixels() {
        let rect = entry(50.0, 25.0, 50.0, 50.0).to_pixels(1280, 720);
        assert_eq!(
            rect,
            PixelRect {
                x: 640,
                y: 180,
                width: 640,
                height: 360
            }
        );
    }

    #[test]
    fn test_out_of_bounds_entries_clip() {
        let e = entry(90.0, 90.0, 30.0, 30.0);
        assert!(!e.is_within_bounds());
        let clipped = e.to_pixels(1000, 1000).clip(1000, 1000).unwrap();
        assert_eq!(clipped.width, 100);
        assert_eq!(clipped.height, 100);
        assert!(entry(120.0, 0.0, 10.0, 10.0)
            .to_pixels(1000, 1000)
            .clip(1000, 1000)
            .is_none());
    }

    proptest::proptest! {
        #[test]
        fn test_clipped_rect_stays_on_canvas(
            x in -50.0f64..150.0,
            y in -50.0f64..150.0,
            w in 0.0f64..120.0,
            h in 0.0f64..120.0,
        ) {
            if let Some(rect) = entry(x, y, w, h).to_pixels(1280, 720).clip(1280, 720) {
                proptest::prop_assert!(rect.x >= 0 && rect.y >= 0);
                proptest::prop_assert!(rect.right() <= 1280 && rect.bottom() <= 720);
                proptest::prop_assert!(!rect.is_empty());
            }
        }
    }

    #[test]
    fn test_huge_and_non_finite_geometry_stays_bounded() {
        let far = entry(1e30, 0.0, 10.0, 10.0).to_pixels(1280, 720);
        assert_eq!(far.x, 4 * 1280);
        assert!(far.clip(1280, 720).is_none());

        let huge = entry(0.0, 0.0, 1e6, 1e6).to_pixels(1280, 720);
        assert_eq!(
            huge.clip(1280, 720),
            Some(PixelRect {
                x: 0,
                y: 0,
                width: 1280,
                height: 720
            })
        );

        let infinite = entry(f64::NEG_INFINITY, 0.0, f64::INFINITY, 50.0).to_pixels(1280, 720);
        assert_eq!(infinite.x, -4 * 1280);

        assert!(entry(f64::NAN, 0.0, 50.0, 50.0).to_pixels(1280, 720).is_empty());
        assert!(entry(0.0, 0.0, 50.0, f64::NAN).to_pixels(1280, 720).is_empty());
    }

    #[test]
    fn test_edges_saturate_instead_of_overflowing() {
        let rect = PixelRect {
            x: i64::MAX - 1,
            y: i64::MAX,
            width: 10,
            height: 10,
        };
        assert_eq!(rect.right(), i64::MAX);
        assert_eq!(rect.bottom(), i64::MAX);
        assert!(rect.clip(1280, 720).is_none());
    }

    proptest::proptest! {
        #[test]
        fn test_any_geometry_converts_and_clips(
            x in proptest::num::f64::ANY,
            y in proptest::num::f64::ANY,
            w in proptest::num::f64::ANY,
            h in proptest::num::f64::ANY,
        ) {
            let rect = entry(x, y, w, h).to_pixels(1280, 720);
            proptest::prop_assert!(rect.x.abs() <= 4 * 1280 && rect.y.abs() <= 4 * 1280);
            proptest::prop_assert!(rect.width <= 4 * 1280 && rect.height <= 4 * 1280);
            if let Some(clipped) = rect.clip(1280, 720) {
                proptest::prop_assert!(clipped.right() <= 1280 && clipped.bottom() <= 720);
            }
        }
    }

    #[test]
    fn test_layout_type_parses() {
        assert_eq!("PIP".parse::<LayoutType>().unwrap(), LayoutType::Pip);
        assert_eq!("custom".parse::<LayoutType>().unwrap(), LayoutType::Custom);
        assert!("grid".parse::<LayoutType>().is_err());
    }
}
