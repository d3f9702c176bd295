//! Router capabilities and the capability-compatibility check
//!
//! Before a consumer is created the consuming side's declared capabilities are
//! matched against the producer's negotiated parameters. Only codecs both sides
//! understand survive into the consumer's parameters; if none do, consumption
//! is refused.

use serde_json::json;

use super::rtp::{
    CodecParameters, MediaKind, RtcpFeedback, RtcpParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters, RtpHeaderExtension,
    RtpHeaderExtensionParameters, RtpParameters,
};
use super::simulcast::LayerBounds;

/// Header extension URIs offered by the router
pub mod header_extensions {
    pub const MID: &str = "urn:ietf:params:rtp-hdrext:sdes:mid";
    pub const RTP_STREAM_ID: &str = "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id";
    pub const ABS_SEND_TIME: &str = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";
    pub const TRANSPORT_WIDE_CC: &str =
        "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
    pub const AUDIO_LEVEL: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
}

fn video_feedback() -> Vec<RtcpFeedback> {
    vec![
        RtcpFeedback::new("nack", ""),
        RtcpFeedback::new("nack", "pli"),
        RtcpFeedback::new("ccm", "fir"),
        RtcpFeedback::new("goog-remb", ""),
        RtcpFeedback::new("transport-cc", ""),
    ]
}

fn video_codec(mime_type: &str, payload_type: u8, mut parameters: CodecParameters) -> RtpCodecCapability {
    parameters.insert("x-google-start-bitrate".into(), json!(1000));
    RtpCodecCapability {
        kind: MediaKind::Video,
        mime_type: mime_type.to_string(),
        preferred_payload_type: Some(payload_type),
        clock_rate: 90_000,
        channels: None,
        parameters,
        rtcp_feedback: video_feedback(),
    }
}

/// The router's media codec table: Opus, VP8, VP9 (profile 2), H264, AV1
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    let mut vp9 = CodecParameters::new();
    vp9.insert("profile-id".into(), json!(2));

    let mut h264 = CodecParameters::new();
    h264.insert("packetization-mode".into(), json!(1));
    h264.insert("profile-level-id".into(), json!("4d0032"));
    h264.insert("level-asymmetry-allowed".into(), json!(1));

    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".into(),
            preferred_payload_type: Some(100),
            clock_rate: 48_000,
            channels: Some(2),
            parameters: CodecParameters::new(),
            rtcp_feedback: vec![RtcpFeedback::new("transport-cc", "")],
        },
        video_codec("video/VP8", 101, CodecParameters::new()),
        video_codec("video/VP9", 102, vp9),
        video_codec("video/H264", 103, h264),
        video_codec("video/AV1", 104, CodecParameters::new()),
    ]
}

/// Full router capabilities for a codec table
pub fn router_capabilities(codecs: Vec<RtpCodecCapability>) -> RtpCapabilities {
    use header_extensions::*;

    let ext = |kind: Option<MediaKind>, uri: &str, id: u16| RtpHeaderExtension {
        kind,
        uri: uri.to_string(),
        preferred_id: id,
    };

    RtpCapabilities {
        codecs,
        header_extensions: vec![
            ext(Some(MediaKind::Audio), MID, 1),
            ext(Some(MediaKind::Video), MID, 1),
            ext(Some(MediaKind::Video), RTP_STREAM_ID, 2),
            ext(Some(MediaKind::Audio), ABS_SEND_TIME, 4),
            ext(Some(MediaKind::Video), ABS_SEND_TIME, 4),
            ext(Some(MediaKind::Video), TRANSPORT_WIDE_CC, 5),
            ext(Some(MediaKind::Audio), AUDIO_LEVEL, 10),
        ],
    }
}

fn param_i64(params: &CodecParameters, key: &str) -> Option<i64> {
    match params.get(key)? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn param_str(params: &CodecParameters, key: &str) -> Option<String> {
    match params.get(key)? {
        serde_json::Value::String(s) => Some(s.to_ascii_lowercase()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Whether a negotiated codec and a capability describe the same format
///
/// Compares MIME type, clock rate and channel count, plus the format
/// parameters that change the bitstream: VP9 `profile-id`, H264
/// `packetization-mode` and the profile part of `profile-level-id`.
pub fn codec_matches(codec: &RtpCodecParameters, cap: &RtpCodecCapability) -> bool {
    if !codec.mime_type.eq_ignore_ascii_case(&cap.mime_type) || codec.clock_rate != cap.clock_rate {
        return false;
    }
    if codec.channels.unwrap_or(1) != cap.channels.unwrap_or(1) {
        return false;
    }

    let mime = codec.mime_type.to_ascii_lowercase();
    match mime.as_str() {
        "video/vp9" => {
            param_i64(&codec.parameters, "profile-id").unwrap_or(0)
                == param_i64(&cap.parameters, "profile-id").unwrap_or(0)
        }
        "video/h264" | "video/h264-svc" => {
            if param_i64(&codec.parameters, "packetization-mode").unwrap_or(0)
                != param_i64(&cap.parameters, "packetization-mode").unwrap_or(0)
            {
                return false;
            }
            // profile_idc + profile_iop; the level may differ
            let profile = |p: &CodecParameters| {
                param_str(p, "profile-level-id")
                    .map(|s| s.chars().take(4).collect::<String>())
                    .unwrap_or_else(|| "42e0".to_string())
            };
            profile(&codec.parameters) == profile(&cap.parameters)
        }
        _ => true,
    }
}

/// Whether `caps` allows consuming a producer with `params`
///
/// At least one media codec of the producer must be matched by a capability.
pub fn can_consume(params: &RtpParameters, caps: &RtpCapabilities) -> bool {
    params
        .media_codecs()
        .any(|codec| caps.codecs.iter().any(|cap| codec_matches(codec, cap)))
}

/// Capabilities usable by a device talking to a router
///
/// Keeps router codecs the device also supports, in router order and with the
/// router's payload types, and only the feedback both sides know. Header
/// extensions survive when both sides list the same URI for the same kind.
pub fn intersect_capabilities(device: &RtpCapabilities, router: &RtpCapabilities) -> RtpCapabilities {
    let codecs = router
        .codecs
        .iter()
        .filter_map(|cap| {
            let as_codec = RtpCodecParameters {
                mime_type: cap.mime_type.clone(),
                payload_type: cap.preferred_payload_type.unwrap_or_default(),
                clock_rate: cap.clock_rate,
                channels: cap.channels,
                parameters: cap.parameters.clone(),
                rtcp_feedback: Vec::new(),
            };
            let local = device
                .codecs
                .iter()
                .find(|local| local.kind == cap.kind && codec_matches(&as_codec, local))?;

            Some(RtpCodecCapability {
                rtcp_feedback: cap
                    .rtcp_feedback
                    .iter()
                    .filter(|fb| local.rtcp_feedback.contains(*fb))
                    .cloned()
                    .collect(),
                ..cap.clone()
            })
        })
        .collect();

    let header_extensions = router
        .header_extensions
        .iter()
        .filter(|ext| {
            device
                .header_extensions
                .iter()
                .any(|local| local.uri == ext.uri && local.kind == ext.kind)
        })
        .cloned()
        .collect();

    RtpCapabilities {
        codecs,
        header_extensions,
    }
}

/// Check a producer's parameters against the router before accepting them
pub fn validate_producer(
    kind: MediaKind,
    params: &RtpParameters,
    router: &RtpCapabilities,
) -> Result<(), ProducerParamsError> {
    let mut media = params.media_codecs().peekable();
    let first = media.peek().ok_or(ProducerParamsError::NoCodecs)?;

    if !first
        .mime_type
        .to_ascii_lowercase()
        .starts_with(kind.mime_prefix())
    {
        return Err(ProducerParamsError::KindMismatch {
            kind,
            mime_type: first.mime_type.clone(),
        });
    }

    if !can_consume(params, router) {
        return Err(ProducerParamsError::Unsupported(
            params
                .media_codecs()
                .map(|c| c.mime_type.clone())
                .collect::<Vec<_>>()
                .join(", "),
        ));
    }

    Ok(())
}

/// Reasons a producer's parameters are refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerParamsError {
    #[error("rtp parameters contain no media codec")]
    NoCodecs,
    #[error("codec {mime_type} does not match kind {kind}")]
    KindMismatch { kind: MediaKind, mime_type: String },
    #[error("no codec supported by the router: {0}")]
    Unsupported(String),
}

/// Derive a consumer's RTP parameters from its producer and the consuming
/// side's capabilities
///
/// Keeps only codecs the consumer supports (using the consumer's preferred
/// payload types), keeps header extensions both sides know, and collapses the
/// producer's encodings into a single consumer encoding whose scalability mode
/// advertises the selectable layers. Returns `None` if nothing matches.
pub fn consumer_rtp_parameters(
    kind: MediaKind,
    producer: &RtpParameters,
    caps: &RtpCapabilities,
    ssrc: u32,
) -> Option<RtpParameters> {
    let codecs: Vec<RtpCodecParameters> = producer
        .media_codecs()
        .filter_map(|codec| {
            let cap = caps.codecs.iter().find(|cap| codec_matches(codec, cap))?;
            Some(RtpCodecParameters {
                payload_type: cap.preferred_payload_type.unwrap_or(codec.payload_type),
                rtcp_feedback: codec
                    .rtcp_feedback
                    .iter()
                    .filter(|fb| cap.rtcp_feedback.contains(*fb))
                    .cloned()
                    .collect(),
                ..codec.clone()
            })
        })
        .collect();

    if codecs.is_empty() {
        return None;
    }

    let header_extensions = caps
        .header_extensions
        .iter()
        .filter(|ext| ext.kind.map_or(true, |k| k == kind))
        .filter(|ext| producer.header_extensions.iter().any(|p| p.uri == ext.uri))
        .map(|ext| RtpHeaderExtensionParameters {
            uri: ext.uri.clone(),
            id: ext.preferred_id,
            encrypt: false,
        })
        .collect();

    let bounds = LayerBounds::of(producer);
    let encoding = RtpEncodingParameters {
        ssrc: Some(ssrc),
        max_bitrate: producer.encodings.iter().filter_map(|e| e.max_bitrate).max(),
        scalability_mode: bounds.is_layered().then(|| bounds.as_mode().to_string()),
        ..Default::default()
    };

    Some(RtpParameters {
        mid: None,
        codecs,
        header_extensions,
        encodings: vec![encoding],
        rtcp: Some(RtcpParameters {
            cname: producer.rtcp.as_ref().and_then(|r| r.cname.clone()),
            reduced_size: true,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(mime: &str, pt: u8, clock: u32) -> RtpCodecParameters {
        RtpCodecParameters {
            mime_type: mime.into(),
            payload_type: pt,
            clock_rate: clock,
            channels: None,
            parameters: CodecParameters::new(),
            rtcp_feedback: vec![RtcpFeedback::new("nack", "")],
        }
    }

    fn vp8_params(encodings: usize) -> RtpParameters {
        RtpParameters {
            codecs: vec![codec("video/VP8", 96, 90_000)],
            header_extensions: vec![RtpHeaderExtensionParameters {
                uri: header_extensions::MID.into(),
                id: 4,
                encrypt: false,
            }],
            encodings: (0..encodings).map(|_| RtpEncodingParameters::default()).collect(),
            rtcp: Some(RtcpParameters {
                cname: Some("abc".into()),
                reduced_size: true,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_router_codecs() {
        let caps = router_capabilities(default_media_codecs());
        assert!(caps.supports(MediaKind::Audio));
        assert!(caps.supports(MediaKind::Video));
        assert_eq!(caps.codecs_of(MediaKind::Video).count(), 4);
    }

    #[test]
    fn test_can_consume() {
        let router = router_capabilities(default_media_codecs());
        assert!(can_consume(&vp8_params(1), &router));

        let audio_only = RtpCapabilities {
            codecs: router.codecs_of(MediaKind::Audio).cloned().collect(),
            header_extensions: vec![],
        };
        assert!(!can_consume(&vp8_params(1), &audio_only));
    }

    #[test]
    fn test_h264_profile_must_match() {
        let router = router_capabilities(default_media_codecs());
        let mut h264 = codec("video/H264", 107, 90_000);
        h264.parameters.insert("packetization-mode".into(), json!(1));
        h264.parameters.insert("profile-level-id".into(), json!("4d001f"));

        let params = RtpParameters {
            codecs: vec![h264.clone()],
            ..Default::default()
        };
        assert!(can_consume(&params, &router));

        h264.parameters.insert("profile-level-id".into(), json!("42e01f"));
        let params = RtpParameters {
            codecs: vec![h264],
            ..Default::default()
        };
        assert!(!can_consume(&params, &router));
    }

    #[test]
    fn test_validate_producer() {
        let router = router_capabilities(default_media_codecs());

        assert!(validate_producer(MediaKind::Video, &vp8_params(1), &router).is_ok());
        assert_eq!(
            validate_producer(MediaKind::Video, &RtpParameters::default(), &router),
            Err(ProducerParamsError::NoCodecs)
        );
        assert!(matches!(
            validate_producer(MediaKind::Audio, &vp8_params(1), &router),
            Err(ProducerParamsError::KindMismatch { .. })
        ));

        let g711 = RtpParameters {
            codecs: vec![codec("audio/PCMU", 0, 8000)],
            ..Default::default()
        };
        assert!(matches!(
            validate_producer(MediaKind::Audio, &g711, &router),
            Err(ProducerParamsError::Unsupported(_))
        ));
    }

    #[test]
    fn test_consumer_parameters() {
        let router = router_capabilities(default_media_codecs());
        let params = consumer_rtp_parameters(MediaKind::Video, &vp8_params(3), &router, 1234).unwrap();

        assert_eq!(params.codecs.len(), 1);
        // consumer's preferred payload type wins
        assert_eq!(params.codecs[0].payload_type, 101);
        assert_eq!(params.encodings.len(), 1);
        assert_eq!(params.encodings[0].ssrc, Some(1234));
        assert_eq!(params.encodings[0].scalability_mode.as_deref(), Some("L3T1"));
        assert_eq!(params.header_extensions.len(), 1);
        assert_eq!(params.rtcp.unwrap().cname.as_deref(), Some("abc"));
    }

    #[test]
    fn test_intersect_with_device() {
        let router = router_capabilities(default_media_codecs());

        let mut device = router_capabilities(
            default_media_codecs()
                .into_iter()
                .filter(|c| c.mime_type != "video/AV1")
                .collect(),
        );
        // device without transport-cc on VP8
        device.codecs[1].rtcp_feedback.retain(|fb| fb.kind != "transport-cc");
        device.header_extensions.retain(|e| e.uri != header_extensions::AUDIO_LEVEL);

        let caps = intersect_capabilities(&device, &router);
        assert_eq!(caps.codecs.len(), 4);
        assert!(caps.codecs.iter().all(|c| c.mime_type != "video/AV1"));
        let vp8 = caps.codecs.iter().find(|c| c.mime_type == "video/VP8").unwrap();
        assert_eq!(vp8.preferred_payload_type, Some(101));
        assert!(!vp8.rtcp_feedback.iter().any(|fb| fb.kind == "transport-cc"));
        assert_eq!(caps.header_extensions.len(), router.header_extensions.len() - 1);
    }

    #[test]
    fn test_consumer_parameters_incompatible() {
        let caps = RtpCapabilities::default();
        assert!(consumer_rtp_parameters(MediaKind::Video, &vp8_params(1), &caps, 1).is_none());
    }
}
