//! Health event handling: narrow recovery first, full restart second.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use classcast_capture_engine::AudioMixer;
use classcast_common::error::{CastError, CastResult, EndedTrack};
use classcast_media_model::StreamStatus;
use classcast_platform_core::TrackKind;
use classcast_publish::HealthEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::controller::{ActiveSession, Shared};

enum Recovery {
    Recovered,
    /// The event concerns a track the session no longer uses.
    Ignored,
    Escalate(String),
    /// The session this supervisor watched is gone.
    Finished,
}

pub(crate) fn spawn(
    shared: Arc<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<HealthEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match shared.handle_health(generation, event).await {
                Recovery::Recovered | Recovery::Ignored => {}
                Recovery::Escalate(reason) => {
                    shared.restart(generation, reason).await;
                    break;
                }
                Recovery::Finished => break,
            }
        }
        tracing::debug!(generation, "Session supervisor exited");
    })
}

impl Shared {
    async fn handle_health(&self, generation: u64, event: HealthEvent) -> Recovery {
        let mut active = self.active.lock().await;
        let Some(session) = active.as_mut().filter(|s| s.generation == generation) else {
            return Recovery::Finished;
        };
        if self.user_stopped.load(Ordering::SeqCst) {
            return Recovery::Finished;
        }

        let outcome = match event {
            HealthEvent::ConnectionLost { state } => {
                return Recovery::Escalate(format!("transport connection {state:?}"));
            }
            HealthEvent::TrackEnded {
                kind: TrackKind::Video,
                track_id,
            } => self.recover_video(session, &track_id).await,
            HealthEvent::TrackEnded {
                kind: TrackKind::Audio,
                track_id,
            } => self.recover_audio(session, &track_id).await,
        };

        match outcome {
            Ok(true) => {
                self.set_status(session.request.running_status());
                Recovery::Recovered
            }
            Ok(false) => Recovery::Ignored,
            Err(e) => {
                tracing::warn!(error = %e, "Narrow recovery failed");
                Recovery::Escalate(e.to_string())
            }
        }
    }

    async fn recover_video(&self, session: &mut ActiveSession, track_id: &str) -> CastResult<bool> {
        let owner = session
            .resources
            .sources
            .iter()
            .position(|s| s.video().id() == track_id);
        if let Some(index) = owner {
            self.replace_source(session, index).await?;
            return Ok(true);
        }

        let composite_ended = session
            .resources
            .compositor
            .as_ref()
            .is_some_and(|c| c.output().track().id() == track_id);
        if composite_ended {
            return Err(CastError::track_ended(
                EndedTrack::Video,
                "composite track ended",
            ));
        }
        tracing::debug!(track = track_id, "Ended video track is no longer in use");
        Ok(false)
    }

    /// Heal every dead audio input at once, so duplicate reports for the
    /// same failure find nothing left to do.
    async fn recover_audio(&self, session: &mut ActiveSession, track_id: &str) -> CastResult<bool> {
        let res = &session.resources;
        let in_use = res.microphone.as_ref().is_some_and(|m| m.id() == track_id)
            || res
                .sources
                .iter()
                .any(|s| s.audio().is_some_and(|a| a.id() == track_id))
            || res
                .mixer
                .as_ref()
                .and_then(AudioMixer::output)
                .is_some_and(|o| o.id() == track_id);
        if !in_use {
            tracing::debug!(track = track_id, "Ended audio track is no longer in use");
            return Ok(false);
        }

        if res.microphone.as_ref().is_some_and(|m| !m.is_live()) {
            self.reacquire_microphone(session).await?;
        }

        // Screen audio usually ends together with its video.
        let vanished: Vec<usize> = session
            .resources
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.video().is_live() && s.audio().is_some())
            .map(|(index, _)| index)
            .collect();
        if vanished.is_empty() {
            self.remix(session).await?;
        }
        for index in vanished {
            self.replace_source(session, index).await?;
        }
        Ok(true)
    }

    /// Reacquire one source and swap it into the compositor in place.
    async fn replace_source(&self, session: &mut ActiveSession, index: usize) -> CastResult<()> {
        let descriptor = session.resources.sources[index].descriptor().clone();
        tracing::warn!(source = %descriptor.id(), "Source ended; reacquiring");
        self.set_status(StreamStatus::Reconnecting);

        let fresh = self.acquirer.acquire(&descriptor).await?;
        session.resources.watch_track(fresh.video());
        if let Some(audio) = fresh.audio() {
            session.resources.watch_track(audio);
        }
        if let Some(compositor) = &session.resources.compositor {
            compositor.replace_source(fresh.id(), fresh.sink().clone());
        }

        let carries_audio = fresh.audio().is_some();
        let old = std::mem::replace(&mut session.resources.sources[index], fresh);
        let had_audio = old.audio().is_some();
        old.release();
        if had_audio || carries_audio {
            self.remix(session).await?;
        }
        tracing::info!(source = %descriptor.id(), "Source replaced in place");
        Ok(())
    }

    async fn reacquire_microphone(&self, session: &mut ActiveSession) -> CastResult<()> {
        let Some(descriptor) = session.request.microphone.clone() else {
            return Ok(());
        };
        tracing::warn!("Microphone ended; reacquiring");
        self.set_status(StreamStatus::Reconnecting);

        let acquisition = self.acquirer.acquire_microphone(&descriptor).await?;
        if let Some(old) = session.resources.microphone.take() {
            old.stop();
        }
        if let Some(track) = &acquisition.track {
            session.resources.watch_track(track);
        }
        session.resources.microphone = acquisition.track;
        session.state.microphone = session.resources.microphone.is_some();
        session.state.warnings.extend(acquisition.warning);
        Ok(())
    }

    /// Point the mixer at the live audio inputs. The mixed track itself is
    /// kept, so the audio producer and the recorder keep reading from it.
    async fn remix(&self, session: &mut ActiveSession) -> CastResult<()> {
        let inputs = session.resources.audio_inputs();
        if let Some(mixer) = &session.resources.mixer {
            if mixer.set_inputs(&inputs) {
                if inputs.is_empty() {
                    let warning = "no audio input left; sending silence".to_string();
                    if !session.state.warnings.contains(&warning) {
                        session.state.warnings.push(warning);
                    }
                }
                return Ok(());
            }
        }
        if inputs.is_empty() {
            return Ok(());
        }

        // The session started without audio: build the graph now. Only the
        // publish side can pick the new track up; a running recording keeps
        // its video-only stream.
        let mixer = AudioMixer::mix(&inputs);
        if let (Some(publish), Some(track)) = (session.resources.publish.as_mut(), mixer.output())
        {
            match publish.producer(TrackKind::Audio) {
                Some(producer) => producer.replace_track(track).await?,
                None if publish.can_produce(TrackKind::Audio) => {
                    let producer = publish.produce(track, &session.state.session_id).await?;
                    session.state.producers.push(producer.id().to_string());
                }
                None => {}
            }
        }
        if let Some(old) = session.resources.mixer.replace(mixer) {
            old.close();
        }
        tracing::info!(inputs = inputs.len(), "Audio mixer built during recovery");
        Ok(())
    }

    /// Tear the session down and build it again after the restart delay,
    /// unless the user stopped it in the meantime.
    async fn restart(self: &Arc<Self>, generation: u64, reason: String) {
        tracing::warn!(reason = %reason, "Escalating to a full session restart");
        self.set_status(StreamStatus::Retrying);
        if let Some(session) = self.active.lock().await.as_ref() {
            if let Some(publish) = &session.resources.publish {
                publish.mark_reconnecting();
            }
        }

        tokio::time::sleep(self.config.publish.restart_delay()).await;

        let mut active = self.active.lock().await;
        if self.user_stopped.load(Ordering::SeqCst) {
            tracing::info!("Stop requested during the restart delay; not restarting");
            return;
        }
        if active.as_ref().map(|s| s.generation) != Some(generation) {
            return;
        }
        let Some(mut old) = active.take() else {
            return;
        };

        // This task is the old supervisor; detach rather than abort it.
        drop(old.supervisor.take());
        let recording = old.resources.release().await;
        let session_id = old.state.session_id.clone();
        let mut warnings = old.state.warnings;
        if let Some(Err(e)) = self.finish_recording(&session_id, &recording).await {
            warnings.push(format!("partial recording not uploaded: {e}"));
        }

        self.set_status(StreamStatus::Reconnecting);
        match self
            .launch(&old.request, old.state.restarts + 1, warnings)
            .await
        {
            Ok(session) => {
                tracing::info!(
                    session = %session_id,
                    restarts = session.state.restarts,
                    "Session restarted"
                );
                self.set_status(session.request.running_status());
                *active = Some(session);
            }
            Err(e) => {
                tracing::error!(session = %session_id, error = %e, "Session restart failed");
                self.set_status(StreamStatus::Failed(e.to_string()));
                if let Err(e) = self.platform.backend.register_stop(&session_id).await {
                    tracing::warn!(error = %e, "Failed to register session stop");
                }
            }
        }
    }
}
