//! The composite output track and its consumer leases.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use classcast_platform_core::MediaTrack;

struct LeaseState {
    track: MediaTrack,
    leases: AtomicUsize,
    owner_released: AtomicBool,
}

impl LeaseState {
    fn stop_if_unused(&self) {
        if self.owner_released.load(Ordering::SeqCst) && self.leases.load(Ordering::SeqCst) == 0 {
            if self.track.stop() {
                tracing::debug!(track = %self.track.id(), "Composite track stopped");
            }
        }
    }
}

/// The compositor's output track.
///
/// Several consumers (publisher, recorder) may hold the same track. Each one
/// takes a [`TrackLease`]; the track is stopped only once the compositor has
/// released it and no lease remains.
#[derive(Clone)]
pub struct CompositeTrack {
    state: Arc<LeaseState>,
}

impl CompositeTrack {
    pub(crate) fn new(track: MediaTrack) -> Self {
        Self {
            state: Arc::new(LeaseState {
                track,
                leases: AtomicUsize::new(0),
                owner_released: AtomicBool::new(false),
            }),
        }
    }

    pub fn track(&self) -> &MediaTrack {
        &self.state.track
    }

    /// Register a consumer.
    pub fn lease(&self, consumer: &str) -> TrackLease {
        let count = self.state.leases.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            track = %self.state.track.id(),
            consumer,
            leases = count,
            "Composite track leased"
        );
        TrackLease {
            state: self.state.clone(),
            consumer: consumer.to_string(),
        }
    }

    pub fn lease_count(&self) -> usize {
        self.state.leases.load(Ordering::SeqCst)
    }

    /// Give up the producer's hold. Returns `true` on the first call.
    pub(crate) fn release(&self) -> bool {
        if self.state.owner_released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.stop_if_unused();
        true
    }
}

/// A consumer's hold on the composite track. Dropping it releases the hold.
pub struct TrackLease {
    state: Arc<LeaseState>,
    consumer: String,
}

impl TrackLease {
    pub fn track(&self) -> &MediaTrack {
        &self.state.track
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

impl std::fmt::Debug for TrackLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackLease")
            .field("track", &self.state.track.id())
            .field("consumer", &self.consumer)
            .finish()
    }
}

impl Drop for TrackLease {
    fn drop(&mut self) {
        self.state.leases.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(
            track = %self.state.track.id(),
            consumer = %self.consumer,
            "Composite lease dropped"
        );
        self.state.stop_if_unused();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_release_without_leases_stops_track() {
        let composite = CompositeTrack::new(MediaTrack::new_video("composite"));
        assert!(composite.release());
        assert!(!composite.track().is_live());
        assert!(!composite.release());
    }

    #[test]
    fn test_track_outlives_owner_while_leased() {
        let composite = CompositeTrack::new(MediaTrack::new_video("composite"));
        let publish = composite.lease("publish");
        let record = composite.lease("record");
        assert_eq!(composite.lease_count(), 2);

        composite.release();
        assert!(composite.track().is_live());

        drop(publish);
        assert!(composite.track().is_live());
        drop(record);
        assert!(!composite.track().is_live());
    }

    #[test]
    fn test_dropping_leases_before_release_keeps_track_live() {
        let composite = CompositeTrack::new(MediaTrack::new_video("composite"));
        drop(composite.lease("publish"));
        assert!(composite.track().is_live());
        composite.release();
        assert!(!composite.track().is_live());
    }
}
