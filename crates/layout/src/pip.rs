//! Picture-in-picture resolution.

use classcast_common::config::CompositorConfig;
use classcast_media_model::{LayoutEntry, SourceKind};

/// Canvas-dependent parameters of the PIP arrangement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipGeometry {
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Square edge as a fraction of the shorter canvas side.
    pub fraction: f64,
    /// Margin to the canvas edge and gap between squares, in pixels.
    pub margin_px: u32,
}

impl PipGeometry {
    pub fn from_config(config: &CompositorConfig) -> Self {
        Self {
            canvas_width: config.canvas_width,
            canvas_height: config.canvas_height,
            fraction: config.pip_fraction,
            margin_px: config.pip_margin_px,
        }
    }

    /// Edge length of one PIP square in pixels.
    pub fn square_px(&self) -> f64 {
        self.canvas_width.min(self.canvas_height) as f64 * self.fraction
    }
}

impl Default for PipGeometry {
    fn default() -> Self {
        Self::from_config(&CompositorConfig::default())
    }
}

/// Display label of a source given its position in the source list.
///
/// Cameras are numbered by their order among cameras only, so a screen in
/// front of them does not shift their numbers.
pub fn source_label(sources: &[SourceKind], index: usize) -> String {
    match &sources[index] {
        SourceKind::Screen { .. } => "Bildschirm".to_string(),
        SourceKind::Camera { .. } => {
            let ordinal = sources[..=index].iter().filter(|s| s.is_camera()).count();
            format!("Kamera {ordinal}")
        }
    }
}

/// Resolve the PIP arrangement for `sources`.
///
/// The screen (if any, else the first camera) fills the frame at
/// `z_index` 0; every other source becomes a square stacked top-down along
/// the right edge.
pub fn resolve_pip(sources: &[SourceKind], geometry: &PipGeometry) -> Vec<LayoutEntry> {
    let Some(main_index) = sources
        .iter()
        .position(|s| s.is_screen())
        .or(if sources.is_empty() { None } else { Some(0) })
    else {
        return Vec::new();
    };

    let cw = geometry.canvas_width.max(1) as f64;
    let ch = geometry.canvas_height.max(1) as f64;
    let size = geometry.square_px();
    let margin = geometry.margin_px as f64;

    let mut entries = Vec::with_capacity(sources.len());
    entries.push(LayoutEntry::full_frame(
        sources[main_index].id(),
        source_label(sources, main_index),
    ));

    let overlays = (0..sources.len()).filter(|&i| i != main_index);
    for (slot, index) in overlays.enumerate() {
        let top = margin + slot as f64 * (size + margin);
        entries.push(LayoutEntry {
            source_id: sources[index].id(),
            x: (cw - size - margin) / cw * 100.0,
            y: top / ch * 100.0,
            width: size / cw * 100.0,
            height: size / ch * 100.0,
            z_index: slot as i32 + 1,
            enabled: true,
            label: source_label(sources, index),
        });
    }

    entries
}
