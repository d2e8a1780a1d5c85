//! Live compositor.
//!
//! A timer task repaints the canvas at the configured rate. Every tick clears
//! the canvas, then draws each enabled layout entry in ascending z-order from
//! its decode sink. Entries whose sink is unknown or not yet ready are skipped
//! for that tick, so a slow camera never stalls the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use classcast_common::config::CompositorConfig;
use classcast_layout::LayoutEngine;
use classcast_media_model::{LayoutEntry, PixelRect, SourceId};
use classcast_platform_core::{DecodeSink, MediaTrack};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::canvas::{Canvas, DrawStyle, LabelStrip};
use crate::track::CompositeTrack;

/// Counters describing compositor activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorStats {
    pub ticks: u64,
    pub frames_emitted: u64,
    /// Entries drawn during the last tick.
    pub last_drawn: usize,
    /// Enabled entries skipped during the last tick.
    pub last_skipped: usize,
    /// Layout version the last tick painted.
    pub layout_version: u64,
}

/// Pixel placements derived from one layout version.
#[derive(Default)]
struct PlacementCache {
    version: Option<u64>,
    placements: Vec<(LayoutEntry, PixelRect)>,
}

struct Inner {
    layout: Arc<LayoutEngine>,
    sinks: RwLock<HashMap<SourceId, DecodeSink>>,
    canvas: Mutex<Canvas>,
    placements: Mutex<PlacementCache>,
    stats: Mutex<CompositorStats>,
    style: DrawStyle,
    output: CompositeTrack,
    epoch: Instant,
    stopped: AtomicBool,
}

impl Inner {
    fn paint(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }

        let snapshot = self.layout.enabled_snapshot();
        let mut cache = self.placements.lock();
        let mut canvas = self.canvas.lock();
        if cache.version != Some(snapshot.version) {
            let (width, height) = (canvas.width(), canvas.height());
            cache.placements = snapshot
                .entries
                .iter()
                .map(|entry| (entry.clone(), entry.to_pixels(width, height)))
                .collect();
            cache.version = Some(snapshot.version);
            tracing::debug!(
                version = snapshot.version,
                entries = cache.placements.len(),
                "Compositor placements rebuilt"
            );
        }

        canvas.clear();
        let sinks = self.sinks.read();
        let mut drawn = 0;
        let mut skipped = 0;
        for (entry, rect) in &cache.placements {
            let frame = sinks
                .get(&entry.source_id)
                .and_then(|sink| sink.current_frame());
            match frame {
                Some(frame) if canvas.draw_source(&frame, *rect, &entry.label, self.style) => {
                    drawn += 1;
                }
                _ => skipped += 1,
            }
        }
        drop(sinks);

        let timestamp_ns = self.epoch.elapsed().as_nanos() as u64;
        let emitted = self.output.track().push_frame(canvas.to_frame(timestamp_ns));

        let mut stats = self.stats.lock();
        stats.ticks += 1;
        if emitted {
            stats.frames_emitted += 1;
        }
        stats.last_drawn = drawn;
        stats.last_skipped = skipped;
        stats.layout_version = snapshot.version;
        emitted
    }
}

/// Draws a set of sources onto one canvas and publishes it as a video track.
pub struct Compositor {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Compositor {
    /// Build a compositor without starting its timer. Tests and offline
    /// callers drive it with [`Compositor::render_once`].
    pub fn new(
        sinks: impl IntoIterator<Item = (SourceId, DecodeSink)>,
        layout: Arc<LayoutEngine>,
        config: &CompositorConfig,
    ) -> Self {
        let canvas = Canvas::new(config.canvas_width, config.canvas_height);
        let inner = Inner {
            layout,
            sinks: RwLock::new(sinks.into_iter().collect()),
            canvas: Mutex::new(canvas),
            placements: Mutex::new(PlacementCache::default()),
            stats: Mutex::new(CompositorStats::default()),
            style: DrawStyle {
                border_px: config.border_px,
                label_strip_px: config.label_strip_px,
            },
            output: CompositeTrack::new(MediaTrack::new_video("composite")),
            epoch: Instant::now(),
            stopped: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
            task: Mutex::new(None),
        }
    }

    /// Build a compositor and start ticking at `config.target_fps`.
    /// Must be called inside a tokio runtime.
    pub fn start(
        sinks: impl IntoIterator<Item = (SourceId, DecodeSink)>,
        layout: Arc<LayoutEngine>,
        config: &CompositorConfig,
    ) -> Self {
        let compositor = Self::new(sinks, layout, config);
        let inner = compositor.inner.clone();
        let period = config.tick_interval();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !inner.paint() {
                    break;
                }
            }
            tracing::debug!("Compositor tick loop exited");
        });
        *compositor.task.lock() = Some(handle);

        tracing::info!(
            width = config.canvas_width,
            height = config.canvas_height,
            fps = config.target_fps,
            sources = compositor.inner.sinks.read().len(),
            "Compositor started"
        );
        compositor
    }

    /// The composite output. Consumers should take a lease on it.
    pub fn output(&self) -> &CompositeTrack {
        &self.inner.output
    }

    /// Paint one frame immediately. Returns `false` once stopped.
    pub fn render_once(&self) -> bool {
        self.inner.paint()
    }

    /// Swap the sink for a source, e.g. after it was reacquired.
    /// The layout is untouched; the next tick draws the new sink.
    pub fn replace_source(&self, source_id: SourceId, sink: DecodeSink) {
        tracing::info!(
            source = %source_id,
            track = %sink.track().id(),
            "Compositor source replaced"
        );
        self.inner.sinks.write().insert(source_id, sink);
    }

    pub fn stats(&self) -> CompositorStats {
        *self.inner.stats.lock()
    }

    /// Labels drawn during the last tick.
    pub fn labels(&self) -> Vec<LabelStrip> {
        self.inner.canvas.lock().labels().to_vec()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.inner.canvas.lock().pixel(x, y)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stop ticking, clear the canvas and release the output track.
    ///
    /// Source tracks are left running. Only the first call has an effect
    /// and returns `true`.
    pub fn stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.inner.canvas.lock().clear();
        self.inner.output.release();
        let stats = self.stats();
        tracing::info!(ticks = stats.ticks, frames = stats.frames_emitted, "Compositor stopped");
        true
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.stop();
    }
}
