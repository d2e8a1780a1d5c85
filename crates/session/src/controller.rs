//! The lifecycle controller.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use classcast_capture_engine::{AudioMixer, CaptureBackend, SourceAcquirer};
use classcast_common::clock::SessionClock;
use classcast_common::config::AppConfig;
use classcast_common::error::{CastError, CastResult};
use classcast_layout::{LayoutEngine, PipGeometry};
use classcast_media_model::{
    DeviceInfo, LayoutEntry, LayoutType, SourceId, SourceKind, StreamStatus,
};
use classcast_platform_core::{MediaStream, MediaTrack};
use classcast_publish::{
    ConnectionState, HealthEvent, HealthMonitor, PublishPipeline, RtcEngine, SignalingChannel,
};
use classcast_recorder::{select_mime_type, LocalRecorder, RecorderBackend, Recording};
use classcast_render_engine::{Compositor, CompositorStats};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::backend::SessionBackend;
use crate::resources::SessionResources;
use crate::state::{SessionState, SessionSummary, StartRequest};
use crate::supervisor;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where published media goes.
#[derive(Clone)]
pub struct PublishTarget {
    pub signaling: Arc<dyn SignalingChannel>,
    pub rtc: Arc<dyn RtcEngine>,
}

/// The platform boundary a controller runs against.
#[derive(Clone)]
pub struct Platform {
    pub capture: Arc<dyn CaptureBackend>,
    pub recorder: Arc<dyn RecorderBackend>,
    pub backend: Arc<dyn SessionBackend>,
    /// `None` allows record-only sessions.
    pub publish: Option<PublishTarget>,
}

pub(crate) struct ActiveSession {
    pub request: StartRequest,
    pub state: SessionState,
    pub clock: SessionClock,
    pub resources: SessionResources,
    /// Distinguishes this run from earlier ones after a full restart.
    pub generation: u64,
    pub supervisor: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    pub platform: Platform,
    pub config: AppConfig,
    pub acquirer: SourceAcquirer,
    pub layout: Arc<LayoutEngine>,
    pub status: watch::Sender<StreamStatus>,
    pub active: Mutex<Option<ActiveSession>>,
    pub user_stopped: AtomicBool,
    pub generation: AtomicU64,
}

/// Owns the single streaming session.
///
/// `start`, `stop` and failure recovery all take the same async lock, so
/// the session is never observed half-built or half-released. Cloning
/// yields another handle to the same controller.
#[derive(Clone)]
pub struct StreamController {
    shared: Arc<Shared>,
}

impl StreamController {
    pub fn new(platform: Platform, config: AppConfig) -> Self {
        let acquirer = SourceAcquirer::new(platform.capture.clone(), config.capture.clone());
        let layout = Arc::new(LayoutEngine::new(PipGeometry::from_config(
            &config.compositor,
        )));
        let (status, _) = watch::channel(StreamStatus::Idle);
        Self {
            shared: Arc::new(Shared {
                platform,
                config,
                acquirer,
                layout,
                status,
                active: Mutex::new(None),
                user_stopped: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.shared.config
    }

    pub fn status(&self) -> StreamStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StreamStatus> {
        self.shared.status.subscribe()
    }

    pub async fn list_devices(&self) -> CastResult<Vec<DeviceInfo>> {
        self.shared.acquirer.list_devices().await
    }

    pub async fn is_active(&self) -> bool {
        self.shared.active.lock().await.is_some()
    }

    pub async fn state(&self) -> Option<SessionState> {
        self.shared
            .active
            .lock()
            .await
            .as_ref()
            .map(|s| s.state.clone())
    }

    pub async fn elapsed(&self) -> Option<Duration> {
        self.shared
            .active
            .lock()
            .await
            .as_ref()
            .map(|s| s.clock.elapsed())
    }

    /// The composite video track of the running session.
    pub async fn composite_track(&self) -> Option<MediaTrack> {
        let active = self.shared.active.lock().await;
        let compositor = active.as_ref()?.resources.compositor.as_ref()?;
        Some(compositor.output().track().clone())
    }

    pub async fn compositor_stats(&self) -> Option<CompositorStats> {
        let active = self.shared.active.lock().await;
        let compositor = active.as_ref()?.resources.compositor.as_ref()?;
        Some(compositor.stats())
    }

    /// Acquire, compose, publish and/or record.
    ///
    /// Fails with `SessionAlreadyActive` while a session runs. Any failure
    /// releases everything acquired so far before the error is returned.
    pub async fn start(&self, request: StartRequest) -> CastResult<SessionState> {
        request.validate()?;
        let mut active = self.shared.active.lock().await;
        if active.is_some() {
            return Err(CastError::SessionAlreadyActive);
        }
        self.shared.user_stopped.store(false, Ordering::SeqCst);

        match self.shared.launch(&request, 0, Vec::new()).await {
            Ok(session) => {
                let state = session.state.clone();
                *active = Some(session);
                self.shared.set_status(request.running_status());
                Ok(state)
            }
            Err(e) => {
                self.shared.set_status(StreamStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Tear the session down and upload the recording.
    ///
    /// Safe to call repeatedly and concurrently: only the call that finds
    /// a session releases it, the others return `None`.
    pub async fn stop(&self) -> Option<SessionSummary> {
        self.shared.user_stopped.store(true, Ordering::SeqCst);
        let mut active = self.shared.active.lock().await;
        let Some(mut session) = active.take() else {
            tracing::debug!("Stop requested without an active session");
            return None;
        };

        self.shared.set_status(StreamStatus::Stopping);
        if let Some(supervisor) = session.supervisor.take() {
            supervisor.abort();
        }
        let recording = session.resources.release().await;

        let session_id = session.state.session_id.clone();
        if let Err(e) = self.shared.platform.backend.register_stop(&session_id).await {
            tracing::warn!(session = %session_id, error = %e, "Failed to register session stop");
            session
                .state
                .warnings
                .push(format!("session stop not registered: {e}"));
        }
        let upload = self.shared.finish_recording(&session_id, &recording).await;

        self.shared.set_status(StreamStatus::Stopped);
        tracing::info!(
            session = %session_id,
            elapsed = %session.clock.elapsed_display(),
            "Session stopped"
        );
        Some(SessionSummary {
            duration: session.clock.elapsed(),
            state: session.state,
            recording,
            upload,
        })
    }

    /// Upload a recording again after a failed attempt.
    pub async fn retry_upload(
        &self,
        session_id: &str,
        recording: &Recording,
    ) -> CastResult<String> {
        self.shared
            .platform
            .backend
            .upload_recording(session_id, recording)
            .await
    }

    pub fn layout(&self) -> &Arc<LayoutEngine> {
        &self.shared.layout
    }

    pub fn layout_entries(&self) -> Vec<LayoutEntry> {
        self.shared.layout.get()
    }

    /// Replace the layout with explicit entries. Returns the new version.
    pub fn set_layout(&self, entries: Vec<LayoutEntry>) -> u64 {
        self.shared.layout.set(entries)
    }

    pub fn set_source_enabled(&self, source_id: &SourceId, enabled: bool) -> Option<u64> {
        self.shared.layout.set_enabled(source_id, enabled)
    }

    pub fn bring_to_front(&self, source_id: &SourceId) -> Option<u64> {
        self.shared.layout.bring_to_front(source_id)
    }

    /// Re-resolve the layout over the running session's sources.
    pub async fn apply_layout(&self, layout_type: LayoutType) -> CastResult<u64> {
        let mut active = self.shared.active.lock().await;
        let session = active.as_mut().ok_or(CastError::NoActiveSession)?;
        let kinds: Vec<SourceKind> = session
            .resources
            .sources
            .iter()
            .map(|s| s.kind().clone())
            .collect();
        let version = self.shared.layout.apply(layout_type, &kinds);
        session.request.layout_type = layout_type;
        session.state.layout_type = layout_type;
        Ok(version)
    }
}

impl Shared {
    pub fn set_status(&self, status: StreamStatus) {
        tracing::info!(status = %status, "Session status");
        self.status.send_replace(status);
    }

    /// Build a complete session. On failure every partial resource is
    /// released before the error is returned.
    pub fn launch<'a>(
        self: &'a Arc<Self>,
        request: &'a StartRequest,
        restarts: u32,
        mut warnings: Vec<String>,
    ) -> BoxFuture<'a, CastResult<ActiveSession>> {
        Box::pin(async move {
            let clock = SessionClock::start();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let mut resources = SessionResources::default();

            let events = match self.assemble(request, &mut resources, &mut warnings).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!(
                        session = %request.session_id,
                        error = %e,
                        "Session start failed; releasing partial resources"
                    );
                    resources.release().await;
                    return Err(e);
                }
            };

            let mut state = SessionState {
                session_id: request.session_id.clone(),
                mode: request.mode(),
                layout_type: request.layout_type,
                sources: resources.sources.iter().map(|s| s.id()).collect(),
                microphone: resources.microphone.is_some(),
                composite_track: resources
                    .compositor
                    .as_ref()
                    .map(|c| c.output().track().id().to_string())
                    .unwrap_or_default(),
                producers: resources
                    .publish
                    .iter()
                    .flat_map(|p| p.producers())
                    .map(|p| p.id().to_string())
                    .collect(),
                recording_mime: resources.recorder.as_ref().map(|r| r.mime_type().to_string()),
                started_at: clock.started_at(),
                restarts,
                warnings,
            };

            if let Err(e) = self.platform.backend.register_start(&state).await {
                tracing::warn!(
                    session = %state.session_id,
                    error = %e,
                    "Failed to register session start"
                );
                state.warnings.push(format!("session start not registered: {e}"));
            }

            tracing::info!(
                session = %state.session_id,
                mode = ?state.mode,
                sources = state.sources.len(),
                producers = state.producers.len(),
                generation,
                "Session started"
            );
            let supervisor = supervisor::spawn(self.clone(), generation, events);
            Ok(ActiveSession {
                request: request.clone(),
                state,
                clock,
                resources,
                generation,
                supervisor: Some(supervisor),
            })
        })
    }

    async fn assemble(
        &self,
        request: &StartRequest,
        res: &mut SessionResources,
        warnings: &mut Vec<String>,
    ) -> CastResult<mpsc::UnboundedReceiver<HealthEvent>> {
        if request.publish && self.platform.publish.is_none() {
            return Err(CastError::config(
                "publishing requested but no publish target is configured",
            ));
        }
        let preferences = &self.config.recorder.mime_preferences;
        if request.record && select_mime_type(&*self.platform.recorder, preferences).is_none() {
            return Err(CastError::UnsupportedFormat {
                candidates: preferences.join(", "),
            });
        }

        for descriptor in &request.sources {
            if res.sources.iter().any(|s| s.id() == descriptor.id()) {
                tracing::warn!(source = %descriptor.id(), "Duplicate source descriptor skipped");
                continue;
            }
            let what = if descriptor.kind.is_screen() { "screen" } else { "camera" };
            self.set_status(StreamStatus::Acquiring(what.to_string()));
            res.sources.push(self.acquirer.acquire(descriptor).await?);
        }

        if let Some(microphone) = &request.microphone {
            self.set_status(StreamStatus::Acquiring("microphone".to_string()));
            let acquisition = self.acquirer.acquire_microphone(microphone).await?;
            res.microphone = acquisition.track;
            warnings.extend(acquisition.warning);
        }

        let mixer = AudioMixer::mix(&res.audio_inputs());
        let audio = mixer.output().cloned();
        res.mixer = Some(mixer);

        let kinds: Vec<SourceKind> = res.sources.iter().map(|s| s.kind().clone()).collect();
        self.layout.apply(request.layout_type, &kinds);
        let compositor = Compositor::start(
            res.sources.iter().map(|s| (s.id(), s.sink().clone())),
            self.layout.clone(),
            &self.config.compositor,
        );
        let composite = compositor.output().clone();
        res.compositor = Some(compositor);

        let target = self.platform.publish.as_ref().filter(|_| request.publish);
        let events = if let Some(target) = target {
            self.set_status(StreamStatus::Connecting);
            let lease = composite.lease("publish");
            let mut pipeline = PublishPipeline::new(
                target.signaling.clone(),
                target.rtc.clone(),
                self.config.publish.clone(),
            );
            let published = pipeline
                .publish(lease.track(), audio.as_ref(), &request.session_id)
                .await;
            res.publish_lease = Some(lease);
            let pipeline = res.publish.insert(pipeline);
            published?;
            pipeline.start_health()?
        } else {
            // No transport: only source tracks are supervised.
            let (_, connection) = watch::channel(ConnectionState::Connected);
            let (monitor, events) = HealthMonitor::spawn(
                connection,
                Vec::new(),
                self.config.publish.health_interval(),
            );
            res.monitor = Some(monitor);
            events
        };

        for source in &res.sources {
            res.watch_track(source.video());
            if let Some(audio) = source.audio() {
                res.watch_track(audio);
            }
        }
        if let Some(microphone) = &res.microphone {
            res.watch_track(microphone);
        }

        if request.record {
            let lease = composite.lease("record");
            let stream = MediaStream::from_tracks(
                std::iter::once(lease.track().clone()).chain(audio.iter().cloned()),
            );
            let started = LocalRecorder::start(
                &*self.platform.recorder,
                &stream,
                &self.config.recorder,
            )
            .await;
            match started {
                Ok(recorder) => {
                    res.recorder = Some(recorder);
                    res.record_lease = Some(lease);
                }
                Err(e) if request.publish => {
                    tracing::warn!(error = %e, "Recorder failed to start; publishing only");
                    warnings.push(format!("recording disabled: {e}"));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(events)
    }

    /// Upload a finished recording. Failures are logged and returned, never
    /// propagated.
    pub async fn finish_recording(
        &self,
        session_id: &str,
        recording: &Option<CastResult<Recording>>,
    ) -> Option<CastResult<String>> {
        match recording.as_ref()? {
            Ok(recording) => {
                let result = self
                    .platform
                    .backend
                    .upload_recording(session_id, recording)
                    .await;
                match &result {
                    Ok(location) => tracing::info!(
                        session = session_id,
                        bytes = recording.size(),
                        location = %location,
                        "Recording uploaded"
                    ),
                    Err(e) => tracing::warn!(
                        session = session_id,
                        error = %e,
                        "Recording upload failed; retry with the returned recording"
                    ),
                }
                Some(result)
            }
            Err(e) => {
                tracing::warn!(session = session_id, error = %e, "Recording discarded");
                None
            }
        }
    }
}
