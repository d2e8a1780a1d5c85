//! Publish health supervision.
//!
//! Two observers feed one event channel: the transport connection state,
//! and a periodic scan of every producer track and every registered source
//! track. Each ended track is reported once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use classcast_platform_core::{MediaTrack, TrackKind};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::producer::Producer;
use crate::transport::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    TrackEnded { kind: TrackKind, track_id: String },
    ConnectionLost { state: ConnectionState },
}

#[derive(Default)]
struct Watched {
    producers: Vec<Arc<Producer>>,
    tracks: Vec<MediaTrack>,
    reported: HashSet<String>,
}

impl Watched {
    fn scan(&mut self) -> Vec<HealthEvent> {
        let mut candidates: Vec<MediaTrack> = self
            .producers
            .iter()
            .filter(|p| !p.is_closed())
            .map(|p| p.track())
            .collect();
        self.tracks.retain(|t| {
            if t.is_live() {
                true
            } else {
                candidates.push(t.clone());
                false
            }
        });

        let mut events = Vec::new();
        for track in candidates {
            if !track.is_live() && self.reported.insert(track.id().to_string()) {
                events.push(HealthEvent::TrackEnded {
                    kind: track.kind(),
                    track_id: track.id().to_string(),
                });
            }
        }
        events
    }
}

pub struct HealthMonitor {
    watched: Arc<Mutex<Watched>>,
    tasks: Vec<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Start observing. Must be called inside a tokio runtime.
    pub fn spawn(
        mut connection: watch::Receiver<ConnectionState>,
        producers: Vec<Arc<Producer>>,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<HealthEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = Arc::new(Mutex::new(Watched {
            producers,
            ..Watched::default()
        }));

        let connection_tx = tx.clone();
        let connection_task = tokio::spawn(async move {
            let mut was_lost = false;
            while connection.changed().await.is_ok() {
                let state = *connection.borrow_and_update();
                if state.is_lost() && !was_lost {
                    tracing::warn!(?state, "Transport connection lost");
                    if connection_tx.send(HealthEvent::ConnectionLost { state }).is_err() {
                        break;
                    }
                }
                was_lost = state.is_lost();
            }
        });

        let scan_watched = watched.clone();
        let scan_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let events = scan_watched.lock().scan();
                for event in events {
                    tracing::warn!(?event, "Health check found an ended track");
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        (
            Self {
                watched,
                tasks: vec![connection_task, scan_task],
            },
            rx,
        )
    }

    /// Also report when `track` ends.
    pub fn watch_track(&self, track: &MediaTrack) {
        self.watched.lock().tracks.push(track.clone());
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(10);

    async fn next(rx: &mut mpsc::UnboundedReceiver<HealthEvent>) -> Option<HealthEvent> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_ended_track_reported_once() {
        let (_state, connection) = watch::channel(ConnectionState::Connected);
        let (monitor, mut rx) = HealthMonitor::spawn(connection, Vec::new(), TICK);
        let camera = MediaTrack::new_video("camera");
        monitor.watch_track(&camera);

        camera.end();
        assert_eq!(
            next(&mut rx).await,
            Some(HealthEvent::TrackEnded {
                kind: TrackKind::Video,
                track_id: camera.id().to_string(),
            })
        );

        tokio::time::sleep(TICK * 5).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_loss_reported_on_transition() {
        let (state, connection) = watch::channel(ConnectionState::Connected);
        let (_monitor, mut rx) = HealthMonitor::spawn(connection, Vec::new(), TICK);

        state.send(ConnectionState::Disconnected).unwrap();
        assert_eq!(
            next(&mut rx).await,
            Some(HealthEvent::ConnectionLost {
                state: ConnectionState::Disconnected
            })
        );

        // Still lost: no second report until the connection came back.
        state.send(ConnectionState::Failed).unwrap();
        tokio::time::sleep(TICK * 3).await;
        assert!(rx.try_recv().is_err());

        state.send(ConnectionState::Connected).unwrap();
        tokio::time::sleep(TICK * 3).await;
        state.send(ConnectionState::Failed).unwrap();
        assert_eq!(
            next(&mut rx).await,
            Some(HealthEvent::ConnectionLost {
                state: ConnectionState::Failed
            })
        );
    }

    #[tokio::test]
    async fn test_stop_closes_event_channel() {
        let (_state, connection) = watch::channel(ConnectionState::Connected);
        let (mut monitor, mut rx) = HealthMonitor::spawn(connection, Vec::new(), TICK);
        monitor.stop();
        assert_eq!(next(&mut rx).await, None);
    }
}
