//! Wire types exchanged with the media router.

use std::collections::BTreeMap;

use classcast_common::config::PublishConfig;
use classcast_platform_core::TrackKind;
use serde::{Deserialize, Serialize};

/// One codec a side can send or receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: TrackKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl RtpCodecCapability {
    pub fn video(mime_type: &str) -> Self {
        Self {
            kind: TrackKind::Video,
            mime_type: mime_type.to_string(),
            clock_rate: 90_000,
            channels: None,
            parameters: BTreeMap::new(),
        }
    }

    pub fn opus() -> Self {
        Self {
            kind: TrackKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48_000,
            channels: Some(2),
            parameters: BTreeMap::new(),
        }
    }

    /// Codec identity ignores parameters; MIME types compare case-insensitively.
    pub fn matches(&self, other: &RtpCodecCapability) -> bool {
        self.kind == other.kind
            && self.mime_type.eq_ignore_ascii_case(&other.mime_type)
            && self.clock_rate == other.clock_rate
            && (self.kind == TrackKind::Video || self.channels == other.channels)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
}

impl RtpCapabilities {
    pub fn supports(&self, kind: TrackKind) -> bool {
        self.codecs.iter().any(|c| c.kind == kind)
    }

    pub fn codecs_for(&self, kind: TrackKind) -> impl Iterator<Item = &RtpCodecCapability> {
        self.codecs.iter().filter(move |c| c.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Parameters the router returns for a new send transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    #[serde(default)]
    pub ice_parameters: serde_json::Value,
    #[serde(default)]
    pub ice_candidates: Vec<serde_json::Value>,
    pub dtls_parameters: DtlsParameters,
}

/// One simulcast layer. Bitrates in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncoding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

/// Codec tuning passed alongside a produce request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_stereo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_fec: Option<bool>,
    /// Kilobits per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_google_start_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_google_max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_google_min_bitrate: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceOptions {
    pub encodings: Vec<RtpEncoding>,
    pub codec_options: CodecOptions,
}

impl ProduceOptions {
    /// Options for the composite video producer.
    pub fn video(config: &PublishConfig) -> Self {
        Self {
            encodings: vec![RtpEncoding {
                max_bitrate: Some(config.video_max_bitrate),
            }],
            codec_options: CodecOptions {
                video_google_start_bitrate: Some(config.video_start_bitrate / 1000),
                video_google_max_bitrate: Some(config.video_max_bitrate / 1000),
                video_google_min_bitrate: Some(config.video_min_bitrate / 1000),
                ..CodecOptions::default()
            },
        }
    }

    /// Options for the mixed audio producer.
    pub fn audio(config: &PublishConfig) -> Self {
        Self {
            encodings: Vec::new(),
            codec_options: CodecOptions {
                opus_stereo: Some(config.opus_stereo),
                opus_fec: Some(config.opus_fec),
                ..CodecOptions::default()
            },
        }
    }

    pub fn for_kind(kind: TrackKind, config: &PublishConfig) -> Self {
        match kind {
            TrackKind::Video => Self::video(config),
            TrackKind::Audio => Self::audio(config),
        }
    }
}

/// What the local sender will actually transmit, as reported to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub encodings: Vec<RtpEncoding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_options_follow_configured_bitrates() {
        let options = ProduceOptions::video(&PublishConfig::default());
        assert_eq!(options.encodings[0].max_bitrate, Some(3_000_000));
        assert_eq!(options.codec_options.video_google_start_bitrate, Some(1500));
        assert_eq!(options.codec_options.video_google_min_bitrate, Some(500));
        assert_eq!(options.codec_options.opus_fec, None);
    }

    #[test]
    fn test_audio_options_enable_stereo_and_fec() {
        let options = ProduceOptions::audio(&PublishConfig::default());
        assert_eq!(options.codec_options.opus_stereo, Some(true));
        assert_eq!(options.codec_options.opus_fec, Some(true));
        assert!(options.encodings.is_empty());
    }

    #[test]
    fn test_capabilities_use_camel_case_on_the_wire() {
        let json = serde_json::to_value(RtpCodecCapability::opus()).unwrap();
        assert_eq!(json["mimeType"], "audio/opus");
        assert_eq!(json["clockRate"], 48_000);
        assert_eq!(json["kind"], "audio");
    }

    #[test]
    fn test_codec_match_ignores_case_and_parameters() {
        let mut remote = RtpCodecCapability::video("video/vp8");
        remote
            .parameters
            .insert("x-google-start-bitrate".into(), 1000.into());
        assert!(RtpCodecCapability::video("video/VP8").matches(&remote));
        assert!(!RtpCodecCapability::video("video/H264").matches(&remote));
    }
}
