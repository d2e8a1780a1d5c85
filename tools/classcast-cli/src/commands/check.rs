//! Check capture and recorder support.

use classcast_capture_engine::backend::gst::has_element;
use classcast_capture_engine::backend::GstCaptureBackend;
use classcast_capture_engine::CaptureBackend;
use classcast_common::config::AppConfig;
use classcast_recorder::{select_mime_type, GstRecorderBackend, RecorderBackend};

const ELEMENTS: &[(&str, &str)] = &[
    ("v4l2src", "camera capture"),
    ("ximagesrc", "screen capture"),
    ("pulsesrc", "microphone capture"),
    ("appsink", "capture output"),
    ("appsrc", "recorder input"),
    ("videoconvert", "video conversion"),
    ("audioconvert", "audio conversion"),
];

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("ClassCast System Check");
    println!("{}", "=".repeat(50));

    let mut missing = 0;
    for (element, purpose) in ELEMENTS {
        if has_element(element) {
            println!("[OK]   {element:<14} {purpose}");
        } else {
            missing += 1;
            println!("[MISS] {element:<14} {purpose}");
        }
    }

    println!();
    let recorder = GstRecorderBackend::new();
    for mime in &config.recorder.mime_preferences {
        let mark = if recorder.is_type_supported(mime) { "OK" } else { "--" };
        println!("[{mark}]   recorder format {mime}");
    }
    let selected = select_mime_type(&recorder, &config.recorder.mime_preferences);

    println!();
    let capture = GstCaptureBackend::new();
    match capture.list_devices().await {
        Ok(devices) => {
            println!("Devices detected: {}", devices.len());
            for device in &devices {
                println!("     {:?} {} ({})", device.kind, device.label, device.device_id);
            }
        }
        Err(e) => println!("[WARN] Device enumeration failed: {e}"),
    }

    println!();
    match selected {
        Some(mime) if missing == 0 => println!("All capture elements found. Recording as {mime}."),
        Some(mime) => println!(
            "Recording as {mime}, but {missing} capture element(s) are missing."
        ),
        None => println!("No preferred recording format is available. Install GStreamer encoders."),
    }
    Ok(())
}
