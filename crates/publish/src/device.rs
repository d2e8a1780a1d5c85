//! Local send capabilities, loaded against the router's.

use classcast_common::error::{CastError, CastResult};
use classcast_platform_core::TrackKind;

use crate::rtp::{RtpCapabilities, RtpCodecCapability};

/// Codecs this client can encode, in preference order.
pub fn local_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![
            RtpCodecCapability::video("video/VP8"),
            RtpCodecCapability::video("video/H264"),
            RtpCodecCapability::opus(),
        ],
    }
}

/// A loaded device: the codecs both sides agree on.
#[derive(Debug, Clone)]
pub struct Device {
    sendable: RtpCapabilities,
}

impl Device {
    /// Intersect `local` with the router's capabilities.
    ///
    /// Fails with a negotiation error when no video codec is shared, since
    /// the composite video is always published.
    pub fn load(local: &RtpCapabilities, router: &RtpCapabilities) -> CastResult<Self> {
        let codecs: Vec<RtpCodecCapability> = local
            .codecs
            .iter()
            .filter_map(|ours| router.codecs.iter().find(|theirs| ours.matches(theirs)))
            .cloned()
            .collect();
        let sendable = RtpCapabilities { codecs };

        if !sendable.supports(TrackKind::Video) {
            return Err(CastError::negotiation(
                "router shares no video codec with this client",
            ));
        }
        if !sendable.supports(TrackKind::Audio) {
            tracing::warn!("Router shares no audio codec; audio will not be published");
        }
        tracing::debug!(codecs = sendable.codecs.len(), "Device loaded");
        Ok(Self { sendable })
    }

    pub fn can_produce(&self, kind: TrackKind) -> bool {
        self.sendable.supports(kind)
    }

    pub fn sendable(&self) -> &RtpCapabilities {
        &self.sendable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_keeps_router_parameters() {
        let mut vp8 = RtpCodecCapability::video("video/vp8");
        vp8.parameters.insert("foo".into(), 1.into());
        let router = RtpCapabilities {
            codecs: vec![vp8.clone(), RtpCodecCapability::opus()],
        };
        let device = Device::load(&local_capabilities(), &router).unwrap();
        assert!(device.can_produce(TrackKind::Video));
        assert!(device.can_produce(TrackKind::Audio));
        assert_eq!(device.sendable().codecs[0], vp8);
        assert_eq!(device.sendable().codecs.len(), 2);
    }

    #[test]
    fn test_missing_video_codec_is_a_negotiation_error() {
        let router = RtpCapabilities {
            codecs: vec![RtpCodecCapability::opus()],
        };
        let err = Device::load(&local_capabilities(), &router).unwrap_err();
        assert!(matches!(err, CastError::Negotiation { .. }));
    }

    #[test]
    fn test_audio_is_optional() {
        let router = RtpCapabilities {
            codecs: vec![RtpCodecCapability::video("video/H264")],
        };
        let device = Device::load(&local_capabilities(), &router).unwrap();
        assert!(!device.can_produce(TrackKind::Audio));
    }
}
