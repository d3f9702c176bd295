//! Simulcast and SVC layer model
//!
//! A video producer can send several alternate-quality encodings (simulcast)
//! or one encoding with internal spatial/temporal layers (SVC, described by a
//! scalability mode such as `L3T3`). Consumers select layers by index, so the
//! ordering here is part of the protocol: index 0 is always the lowest quality.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::rtp::{MediaKind, RtpEncodingParameters, RtpParameters};

/// Bitrate ceilings (bps) for the first simulcast encodings, ascending
pub const SIMULCAST_BITRATE_CEILINGS: [u32; 4] = [200_000, 500_000, 1_500_000, 3_000_000];

/// Parsed scalability mode (`L<spatial>T<temporal>[_KEY][_SHIFT]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalabilityMode {
    pub spatial_layers: u8,
    pub temporal_layers: u8,
    /// K-SVC: spatial layers only depend on each other at keyframes
    pub ksvc: bool,
}

impl Default for ScalabilityMode {
    fn default() -> Self {
        Self {
            spatial_layers: 1,
            temporal_layers: 1,
            ksvc: false,
        }
    }
}

impl FromStr for ScalabilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid scalability mode: {}", s);

        let rest = s
            .strip_prefix('L')
            .or_else(|| s.strip_prefix('S'))
            .ok_or_else(invalid)?;
        let t_pos = rest.find('T').ok_or_else(invalid)?;
        let spatial: u8 = rest[..t_pos].parse().map_err(|_| invalid())?;

        let after_t = &rest[t_pos + 1..];
        let digits_end = after_t
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after_t.len());
        let temporal: u8 = after_t[..digits_end].parse().map_err(|_| invalid())?;
        let suffix = &after_t[digits_end..];

        if spatial == 0 || temporal == 0 {
            return Err(invalid());
        }

        Ok(Self {
            spatial_layers: spatial,
            temporal_layers: temporal,
            ksvc: suffix.contains("_KEY"),
        })
    }
}

impl std::fmt::Display for ScalabilityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}T{}", self.spatial_layers, self.temporal_layers)?;
        if self.ksvc {
            write!(f, "_KEY")?;
        }
        Ok(())
    }
}

/// Bitrate ceiling for a given encoding index
///
/// Follows [`SIMULCAST_BITRATE_CEILINGS`], doubling past the end of the table.
pub fn bitrate_ceiling(index: usize) -> u32 {
    let last = SIMULCAST_BITRATE_CEILINGS.len() - 1;
    if index <= last {
        SIMULCAST_BITRATE_CEILINGS[index]
    } else {
        let shift = (index - last).min(8) as u32;
        SIMULCAST_BITRATE_CEILINGS[last].saturating_mul(1 << shift)
    }
}

/// Assign per-layer bitrate ceilings to a multi-encoding producer
///
/// With a single encoding nothing changes. With `n > 1` encodings, encoding
/// `i` gets `bitrate_ceiling(i)`; video encodings additionally get
/// `scale_resolution_down_by = 2^(n-1-i)` so the last index is full resolution.
pub fn apply_simulcast_ceilings(kind: MediaKind, encodings: &mut [RtpEncodingParameters]) {
    let count = encodings.len();
    if count <= 1 {
        return;
    }

    for (index, encoding) in encodings.iter_mut().enumerate() {
        encoding.max_bitrate = Some(bitrate_ceiling(index));
        if kind == MediaKind::Video {
            let exponent = (count - 1 - index).min(16) as i32;
            encoding.scale_resolution_down_by = Some(2f64.powi(exponent));
        }
    }
}

/// Apply an SVC scalability mode to the first encoding
pub fn apply_scalability_mode(
    encodings: &mut Vec<RtpEncodingParameters>,
    mode: &str,
) -> Result<ScalabilityMode, String> {
    let parsed: ScalabilityMode = mode.parse()?;

    if encodings.is_empty() {
        encodings.push(RtpEncodingParameters::default());
    }
    encodings[0].scalability_mode = Some(mode.to_string());

    Ok(parsed)
}

/// Number of selectable layers of a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerBounds {
    pub spatial_layers: u8,
    pub temporal_layers: u8,
}

impl LayerBounds {
    /// Derive the layer structure from a producer's parameters
    ///
    /// Simulcast producers have one spatial layer per encoding; an SVC producer
    /// takes its spatial count from the scalability mode. Temporal layers are
    /// the maximum declared by any encoding.
    pub fn of(params: &RtpParameters) -> Self {
        let modes: Vec<ScalabilityMode> = params
            .encodings
            .iter()
            .map(|e| {
                e.scalability_mode
                    .as_deref()
                    .and_then(|m| m.parse().ok())
                    .unwrap_or_default()
            })
            .collect();

        let spatial_layers = if params.encodings.len() > 1 {
            params.encodings.len().min(u8::MAX as usize) as u8
        } else {
            modes.first().map(|m| m.spatial_layers).unwrap_or(1)
        };
        let temporal_layers = modes.iter().map(|m| m.temporal_layers).max().unwrap_or(1);

        Self {
            spatial_layers,
            temporal_layers,
        }
    }

    /// Whether this producer offers any layer choice at all
    pub fn is_layered(&self) -> bool {
        self.spatial_layers > 1 || self.temporal_layers > 1
    }

    /// Scalability mode describing the consumer side of these bounds
    pub fn as_mode(&self) -> ScalabilityMode {
        ScalabilityMode {
            spatial_layers: self.spatial_layers,
            temporal_layers: self.temporal_layers,
            ksvc: false,
        }
    }
}

/// Spatial + temporal layer pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayers {
    pub spatial_layer: u8,
    pub temporal_layer: u8,
}

/// Requested layer outside what the producer sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerOutOfRange {
    pub requested: ConsumerLayers,
    pub bounds: LayerBounds,
}

impl std::fmt::Display for LayerOutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "layers {}/{} out of range (spatial < {}, temporal < {})",
            self.requested.spatial_layer,
            self.requested.temporal_layer,
            self.bounds.spatial_layers,
            self.bounds.temporal_layers
        )
    }
}

/// Resolve a preferred-layers request against a producer's bounds
///
/// Both omitted means automatic selection (`Ok(None)`). If only one index is
/// given the other defaults to the highest available layer.
pub fn resolve_preferred_layers(
    bounds: LayerBounds,
    spatial: Option<u8>,
    temporal: Option<u8>,
) -> Result<Option<ConsumerLayers>, LayerOutOfRange> {
    if spatial.is_none() && temporal.is_none() {
        return Ok(None);
    }

    let requested = ConsumerLayers {
        spatial_layer: spatial.unwrap_or(bounds.spatial_layers.saturating_sub(1)),
        temporal_layer: temporal.unwrap_or(bounds.temporal_layers.saturating_sub(1)),
    };

    if requested.spatial_layer >= bounds.spatial_layers
        || requested.temporal_layer >= bounds.temporal_layers
    {
        return Err(LayerOutOfRange { requested, bounds });
    }

    Ok(Some(requested))
}
