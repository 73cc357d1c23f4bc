//! Carrier-level version negotiation, separate from the Sphinx/placement
//! cores: spec.md treats the carrier as an opaque transport and is silent on
//! how two mixnodes first agree they can talk. This is the bootstrapping
//! machinery a real TCP service needs before any Sphinx frame is processed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{FogError, FogResult};

/// Fogmix wire protocol version (MAJOR.MINOR.PATCH).
///
/// Major must match exactly; a higher minor can talk down to a lower one
/// (backward compatible), never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ProtocolVersion {
    pub const CURRENT: Self = Self {
        major: 1,
        minor: 0,
        patch: 0,
    };

    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }

    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.major == other.major && self.minor >= other.minor
    }

    /// Encode as `0x1M` for major 1; `0xFF` for anything else.
    pub fn encode_byte(&self) -> u8 {
        if self.major == 1 {
            0x10 | (self.minor & 0x0F)
        } else {
            0xFF
        }
    }

    pub fn decode_byte(byte: u8) -> Option<Self> {
        if byte & 0xF0 == 0x10 {
            Some(Self::new(1, byte & 0x0F, 0))
        } else {
            None
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Capability flags advertised alongside the version, so an older carrier
/// can tell a newer one which optional wire features it understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub relay_lottery: bool,
    pub vrf_delays: bool,
    pub cover_traffic: bool,
    pub batch_egress: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            relay_lottery: true,
            vrf_delays: true,
            cover_traffic: true,
            batch_egress: true,
        }
    }
}

impl FeatureFlags {
    /// `self` supports everything `other` requires.
    pub fn supports(&self, other: &Self) -> bool {
        (!other.relay_lottery || self.relay_lottery)
            && (!other.vrf_delays || self.vrf_delays)
            && (!other.cover_traffic || self.cover_traffic)
            && (!other.batch_egress || self.batch_egress)
    }
}

/// What a mixnode sends when a carrier connection opens, before any Sphinx
/// frame flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolAdvertisement {
    pub version: ProtocolVersion,
    pub features: FeatureFlags,
    pub node_id: String,
}

impl ProtocolAdvertisement {
    pub fn new(version: ProtocolVersion, node_id: String) -> Self {
        Self {
            version,
            features: FeatureFlags::default(),
            node_id,
        }
    }

    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.version.is_compatible_with(&other.version)
    }

    pub fn encode(&self) -> FogResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| FogError::Protocol(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> FogResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| FogError::Protocol(e.to_string()))
    }
}

/// Resolve the version two advertisements negotiate down to: the lower of
/// the two, since backward compatibility only flows one direction.
pub fn negotiate(ours: &ProtocolAdvertisement, theirs: &ProtocolAdvertisement) -> FogResult<ProtocolVersion> {
    if !ours.is_compatible_with(theirs) {
        return Err(FogError::Protocol(format!(
            "incompatible protocol versions: ours={}, theirs={}",
            ours.version, theirs.version
        )));
    }
    Ok(ours.version.min(theirs.version))
}
