//! REST backend boundary.

use std::sync::atomic::{AtomicUsize, Ordering};

use classcast_common::error::{CastError, CastResult};
use classcast_recorder::Recording;
use parking_lot::Mutex;

use crate::state::SessionState;

/// The server side that tracks sessions and stores recordings.
///
/// Only success or failure matters to the session; response bodies are
/// not interpreted.
#[async_trait::async_trait]
pub trait SessionBackend: Send + Sync {
    /// Called once publishing (or recording) is up.
    async fn register_start(&self, state: &SessionState) -> CastResult<()>;

    /// Called after teardown.
    async fn register_stop(&self, session_id: &str) -> CastResult<()>;

    /// Store a finished recording. Returns where it was stored.
    async fn upload_recording(
        &self,
        session_id: &str,
        recording: &Recording,
    ) -> CastResult<String>;
}

/// Backend that only logs. Used when no server is configured.
#[derive(Debug, Default)]
pub struct LoggingSessionBackend;

#[async_trait::async_trait]
impl SessionBackend for LoggingSessionBackend {
    async fn register_start(&self, state: &SessionState) -> CastResult<()> {
        tracing::info!(session = %state.session_id, mode = ?state.mode, "Session start registered");
        Ok(())
    }

    async fn register_stop(&self, session_id: &str) -> CastResult<()> {
        tracing::info!(session = session_id, "Session stop registered");
        Ok(())
    }

    async fn upload_recording(
        &self,
        session_id: &str,
        recording: &Recording,
    ) -> CastResult<String> {
        tracing::info!(session = session_id, bytes = recording.size(), "Recording upload skipped");
        Ok(format!("local://{session_id}.{}", recording.file_extension()))
    }
}

/// Backend that records every call. Uploads can be made to fail.
#[derive(Debug, Default)]
pub struct MemorySessionBackend {
    starts: Mutex<Vec<String>>,
    stops: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, usize)>>,
    failing_uploads: AtomicUsize,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` uploads.
    pub fn fail_uploads(&self, times: usize) {
        self.failing_uploads.store(times, Ordering::SeqCst);
    }

    pub fn starts(&self) -> Vec<String> {
        self.starts.lock().clone()
    }

    pub fn stops(&self) -> Vec<String> {
        self.stops.lock().clone()
    }

    /// Session id and byte size of every stored recording.
    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.uploads.lock().clone()
    }
}

#[async_trait::async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn register_start(&self, state: &SessionState) -> CastResult<()> {
        self.starts.lock().push(state.session_id.clone());
        Ok(())
    }

    async fn register_stop(&self, session_id: &str) -> CastResult<()> {
        self.stops.lock().push(session_id.to_string());
        Ok(())
    }

    async fn upload_recording(
        &self,
        session_id: &str,
        recording: &Recording,
    ) -> CastResult<String> {
        let failing = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CastError::upload("upload rejected (simulated)"));
        }
        self.uploads
            .lock()
            .push((session_id.to_string(), recording.size()));
        Ok(format!("memory://{session_id}"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn recording(mime: &str) -> Recording {
        Recording {
            mime_type: mime.to_string(),
            data: vec![0; 512],
            chunk_count: 4,
            truncated: false,
            forced_stop: false,
            started_at: chrono::Utc::now(),
            duration: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_failed_upload_then_retry() {
        let backend = MemorySessionBackend::new();
        backend.fail_uploads(1);

        let err = backend
            .upload_recording("s1", &recording("video/webm"))
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::Upload { .. }));
        assert!(backend.uploads().is_empty());

        let location = backend
            .upload_recording("s1", &recording("video/webm"))
            .await
            .unwrap();
        assert_eq!(location, "memory://s1");
        assert_eq!(backend.uploads(), vec![("s1".to_string(), 512)]);
    }

    #[tokio::test]
    async fn test_logging_backend_location_uses_extension() {
        let location = LoggingSessionBackend
            .upload_recording("s2", &recording("video/mp4"))
            .await
            .unwrap();
        assert_eq!(location, "local://s2.mp4");
    }
}
