//! Media negotiation model
//!
//! This module provides:
//! - RTP parameter and capability types exchanged with clients
//! - The router codec table and the capability-compatibility check
//! - Simulcast/SVC layer bookkeeping (bitrate ceilings, layer bounds)

pub mod capabilities;
pub mod rtp;
pub mod simulcast;

pub use capabilities::{
    can_consume, consumer_rtp_parameters, default_media_codecs, intersect_capabilities,
    router_capabilities,
};
pub use rtp::{
    MediaKind, RtpCapabilities, RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters,
    RtpParameters,
};
pub use simulcast::{ConsumerLayers, LayerBounds, ScalabilityMode};
