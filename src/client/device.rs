//! Local media device
//!
//! What the client side can encode and decode, and the parameters it offers
//! when connecting transports and producing.

use uuid::Uuid;

use crate::media::capabilities::header_extensions;
use crate::media::rtp::{RtcpParameters, RtpHeaderExtensionParameters};
use crate::media::{
    default_media_codecs, router_capabilities, MediaKind, RtpCapabilities, RtpCodecCapability,
    RtpCodecParameters, RtpEncodingParameters, RtpParameters,
};
use crate::transport::{DtlsFingerprint, DtlsParameters, DtlsRole};

/// Local media stack the negotiation mirror drives
pub trait LocalDevice: Send + Sync {
    /// Everything the device can send and receive
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Local DTLS parameters for a new transport
    fn dtls_parameters(&self) -> DtlsParameters;

    /// Parameters for a new outbound track of `kind`
    ///
    /// `capabilities` are the negotiated (device ∩ router) capabilities.
    /// Returns `None` if no negotiated codec fits the kind.
    fn send_parameters(
        &self,
        kind: MediaKind,
        capabilities: &RtpCapabilities,
        encodings: usize,
    ) -> Option<RtpParameters>;
}

/// Device with a fixed codec table
#[derive(Debug, Clone)]
pub struct StaticDevice {
    capabilities: RtpCapabilities,
    fingerprint: String,
    cname: String,
}

impl StaticDevice {
    /// Device supporting every codec of the default router table
    pub fn new() -> Self {
        Self::with_codecs(default_media_codecs())
    }

    pub fn with_codecs(codecs: Vec<RtpCodecCapability>) -> Self {
        let digest = Uuid::new_v4().as_bytes().repeat(2);
        let fingerprint = digest
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");

        Self {
            capabilities: router_capabilities(codecs),
            fingerprint,
            cname: Uuid::new_v4().simple().to_string(),
        }
    }
}

impl Default for StaticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDevice for StaticDevice {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    fn dtls_parameters(&self) -> DtlsParameters {
        DtlsParameters {
            role: Some(DtlsRole::Client),
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: self.fingerprint.clone(),
            }],
        }
    }

    fn send_parameters(
        &self,
        kind: MediaKind,
        capabilities: &RtpCapabilities,
        encodings: usize,
    ) -> Option<RtpParameters> {
        let codec = capabilities.codecs_of(kind).next()?;

        let header_extensions = capabilities
            .header_extensions
            .iter()
            .filter(|ext| ext.kind.map_or(true, |k| k == kind))
            .map(|ext| RtpHeaderExtensionParameters {
                uri: ext.uri.clone(),
                id: ext.preferred_id,
                encrypt: false,
            })
            .collect::<Vec<_>>();

        let encodings = if encodings > 1 && kind == MediaKind::Video {
            (0..encodings)
                .map(|i| RtpEncodingParameters {
                    rid: Some(format!("r{}", i)),
                    ..Default::default()
                })
                .collect()
        } else {
            vec![RtpEncodingParameters {
                ssrc: Some(Uuid::new_v4().as_u128() as u32),
                ..Default::default()
            }]
        };

        let mid = header_extensions
            .iter()
            .any(|ext| ext.uri == header_extensions::MID)
            .then(|| "0".to_string());

        Some(RtpParameters {
            mid,
            codecs: vec![RtpCodecParameters {
                mime_type: codec.mime_type.clone(),
                payload_type: codec.preferred_payload_type.unwrap_or(96),
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                parameters: codec.parameters.clone(),
                rtcp_feedback: codec.rtcp_feedback.clone(),
            }],
            header_extensions,
            encodings,
            rtcp: Some(RtcpParameters {
                cname: Some(self.cname.clone()),
                reduced_size: true,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::capabilities::validate_producer;

    #[test]
    fn test_send_parameters_accepted_by_router() {
        let device = StaticDevice::new();
        let router = router_capabilities(default_media_codecs());

        let video = device
            .send_parameters(MediaKind::Video, &router, 3)
            .unwrap();
        assert_eq!(video.encodings.len(), 3);
        assert_eq!(video.codecs[0].mime_type, "video/VP8");
        assert!(validate_producer(MediaKind::Video, &video, &router).is_ok());

        // audio never simulcasts
        let audio = device.send_parameters(MediaKind::Audio, &router, 3).unwrap();
        assert_eq!(audio.encodings.len(), 1);
        assert!(audio.encodings[0].ssrc.is_some());
    }

    #[test]
    fn test_no_codec_for_kind() {
        let device = StaticDevice::with_codecs(
            default_media_codecs()
                .into_iter()
                .filter(|c| c.kind == MediaKind::Audio)
                .collect(),
        );
        let caps = device.rtp_capabilities();
        assert!(device.send_parameters(MediaKind::Video, &caps, 1).is_none());
    }

    #[test]
    fn test_fingerprint_format() {
        let dtls = StaticDevice::new().dtls_parameters();
        assert_eq!(dtls.fingerprints[0].value.len(), 32 * 3 - 1);
    }
}
