//! Local recording of the composite stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use classcast_common::config::RecorderConfig;
use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::MediaStream;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{RecorderBackend, RecorderControl};
use crate::buffer::ChunkBuffer;

/// A finished recording.
#[derive(Debug, Clone)]
pub struct Recording {
    pub mime_type: String,
    pub data: Vec<u8>,
    pub chunk_count: usize,
    /// The oldest part was discarded because the buffer filled up.
    pub truncated: bool,
    /// The encoder had to be torn down; the tail may be missing.
    pub forced_stop: bool,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl Recording {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn file_extension(&self) -> &'static str {
        if self.mime_type.starts_with("video/mp4") {
            "mp4"
        } else {
            "webm"
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub chunks: usize,
    pub bytes: usize,
    pub dropped_chunks: usize,
    pub truncated: bool,
}

/// The first preference the backend supports.
pub fn select_mime_type(backend: &dyn RecorderBackend, preferences: &[String]) -> Option<String> {
    preferences
        .iter()
        .find(|mime| backend.is_type_supported(mime))
        .cloned()
}

struct Running {
    stopped: watch::Receiver<bool>,
    control: Arc<dyn RecorderControl>,
    collector: JoinHandle<()>,
}

pub struct LocalRecorder {
    mime_type: String,
    config: RecorderConfig,
    buffer: Arc<Mutex<ChunkBuffer>>,
    running: tokio::sync::Mutex<Option<Running>>,
    started_at: DateTime<Utc>,
    epoch: Instant,
    stopped: AtomicBool,
}

impl LocalRecorder {
    /// Pick a container format and start encoding `stream`.
    ///
    /// Fails with `UnsupportedFormat` before anything is started when the
    /// backend supports none of the configured MIME types.
    pub async fn start(
        backend: &dyn RecorderBackend,
        stream: &MediaStream,
        config: &RecorderConfig,
    ) -> CastResult<Self> {
        let mime_type = select_mime_type(backend, &config.mime_preferences).ok_or_else(|| {
            CastError::UnsupportedFormat {
                candidates: config.mime_preferences.join(", "),
            }
        })?;

        let session = backend.start(stream, &mime_type, config.timeslice()).await?;
        let buffer = Arc::new(Mutex::new(ChunkBuffer::new(config.max_buffered_chunks)));

        let mut chunks = session.chunks;
        let sink = buffer.clone();
        let collector = tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                sink.lock().push(chunk);
            }
        });

        tracing::info!(
            backend = backend.name(),
            mime = %mime_type,
            tracks = stream.tracks().len(),
            "Recording started"
        );
        Ok(Self {
            mime_type,
            config: config.clone(),
            buffer,
            running: tokio::sync::Mutex::new(Some(Running {
                stopped: session.stopped,
                control: session.control,
                collector,
            })),
            started_at: Utc::now(),
            epoch: Instant::now(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RecorderStats {
        let buffer = self.buffer.lock();
        RecorderStats {
            chunks: buffer.len(),
            bytes: buffer.bytes(),
            dropped_chunks: buffer.dropped_chunks(),
            truncated: buffer.truncated(),
        }
    }

    /// Stop encoding and assemble the recording.
    ///
    /// A graceful stop is requested first; if the encoder does not confirm
    /// within the configured timeout it is forced down and whatever arrived
    /// is still assembled. Only the first call yields a recording.
    pub async fn stop(&self) -> CastResult<Recording> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Err(CastError::recorder("recorder already stopped"));
        };
        self.stopped.store(true, Ordering::SeqCst);

        running.control.request_stop();
        let timeout = self.config.force_stop_timeout();
        let graceful = matches!(
            tokio::time::timeout(timeout, running.stopped.wait_for(|stopped| *stopped)).await,
            Ok(Ok(_))
        );
        if !graceful {
            tracing::warn!(?timeout, "Recorder did not stop in time; forcing");
            running.control.force_stop();
        }

        // Give the last chunks a moment to arrive.
        if tokio::time::timeout(self.config.trailing_wait(), &mut running.collector)
            .await
            .is_err()
        {
            running.collector.abort();
        }

        let buffer = self.buffer.lock();
        let data = buffer.assemble();
        if data.len() < self.config.min_blob_bytes {
            tracing::error!(
                size = data.len(),
                minimum = self.config.min_blob_bytes,
                "Recording too small"
            );
            return Err(CastError::RecordingTooSmall {
                size: data.len(),
                minimum: self.config.min_blob_bytes,
            });
        }

        let recording = Recording {
            mime_type: self.mime_type.clone(),
            chunk_count: buffer.len(),
            truncated: buffer.truncated(),
            forced_stop: !graceful,
            started_at: self.started_at,
            duration: self.epoch.elapsed(),
            data,
        };
        if recording.truncated {
            tracing::warn!(dropped = buffer.dropped_chunks(), "Recording is missing its beginning");
        }
        tracing::info!(
            bytes = recording.size(),
            chunks = recording.chunk_count,
            forced = recording.forced_stop,
            "Recording stopped"
        );
        Ok(recording)
    }
}
