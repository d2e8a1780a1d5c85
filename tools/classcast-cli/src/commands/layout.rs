//! Print a resolved layout.

use anyhow::bail;
use classcast_common::config::AppConfig;
use classcast_layout::{LayoutEngine, PipGeometry};
use classcast_media_model::{LayoutType, ScreenTarget, SourceKind};
use serde_json::json;

pub fn run(config: &AppConfig, sources: &[String], layout_type: LayoutType) -> anyhow::Result<()> {
    let kinds = sources
        .iter()
        .map(|s| parse_source(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (width, height) = (config.compositor.canvas_width, config.compositor.canvas_height);
    let engine = LayoutEngine::new(PipGeometry::from_config(&config.compositor));
    let entries: Vec<_> = engine
        .resolve(layout_type, &kinds)
        .into_iter()
        .map(|entry| {
            let rect = entry.to_pixels(width, height);
            json!({
                "entry": entry,
                "pixels": { "x": rect.x, "y": rect.y, "width": rect.width, "height": rect.height },
            })
        })
        .collect();

    let out = json!({
        "layout": layout_type.to_string(),
        "canvas": { "width": width, "height": height },
        "entries": entries,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// `screen` or `camera:<device>`.
fn parse_source(s: &str) -> anyhow::Result<SourceKind> {
    match s.split_once(':') {
        None if s == "screen" => Ok(SourceKind::Screen {
            target: ScreenTarget::default(),
        }),
        Some(("camera", device)) if !device.is_empty() => Ok(SourceKind::Camera {
            device_id: device.to_string(),
        }),
        _ => bail!("invalid source '{s}' (expected 'screen' or 'camera:<device>')"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_sources() {
        assert!(parse_source("screen").unwrap().is_screen());
        assert_eq!(
            parse_source("camera:/dev/video0").unwrap(),
            SourceKind::Camera {
                device_id: "/dev/video0".to_string()
            }
        );
        assert!(parse_source("camera:").is_err());
        assert!(parse_source("window").is_err());
    }
}
