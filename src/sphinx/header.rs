//! Wire layout for the Sphinx header: an ephemeral public key, a layered
//! routing-info blob, and an integrity MAC, packed into a fixed 176 bytes.
//!
//! Relays are addressed inside the header by an opaque 8-byte [`RelayId`]
//! rather than a `SocketAddr` — a full address-plus-port would not fit
//! alongside a per-hop MAC within the fixed 176-byte budget. The mixnode
//! pipeline resolves a `RelayId` to a network address via its own relay
//! directory before handing the forwarded packet to the carrier.

use crate::{FogError, FogResult};

/// Protocol-wide maximum path length.
pub const MAX_HOPS: usize = 5;

/// Size in bytes of the MAC carried in the header and the one nested in
/// each routing block (next-hop MAC).
pub const MAC_SIZE: usize = 16;

/// Size in bytes of one routing-info block: flag + relay id + next-hop MAC.
pub const BLOCK_SIZE: usize = 1 + 8 + MAC_SIZE;

/// Size in bytes of the routing-info blob. `MAX_HOPS` blocks plus a few
/// bytes of fixed padding that round the header out to 176 bytes.
pub const ROUTING_INFO_SIZE: usize = 128;

/// Total header size: ephemeral pubkey (32) + MAC (16) + routing info (128).
pub const HEADER_SIZE: usize = 32 + MAC_SIZE + ROUTING_INFO_SIZE;

/// Fixed Sphinx payload size.
pub const PAYLOAD_SIZE: usize = 1024;

const FLAG_FORWARD: u8 = 0;
const FLAG_END_OF_PATH: u8 = 1;

/// Opaque 8-byte relay identifier: the first 8 bytes of `BLAKE3(pubkey)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayId(pub [u8; 8]);

impl RelayId {
    pub fn from_pubkey_bytes(pubkey: &[u8; 32]) -> Self {
        let hash = blake3::hash(pubkey);
        let mut id = [0u8; 8];
        id.copy_from_slice(&hash.as_bytes()[..8]);
        RelayId(id)
    }
}

/// One hop's routing decision, decoded from a routing-info block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingBlock {
    /// Forward to the given next-hop relay, using `next_mac` as the MAC
    /// field of the forwarded header.
    Forward {
        next_hop: RelayId,
        next_mac: [u8; MAC_SIZE],
    },
    /// Terminal hop; deliver the payload to the caller.
    EndOfPath,
}

impl RoutingBlock {
    pub fn encode(self) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        match self {
            RoutingBlock::EndOfPath => {
                block[0] = FLAG_END_OF_PATH;
            }
            RoutingBlock::Forward { next_hop, next_mac } => {
                block[0] = FLAG_FORWARD;
                block[1..9].copy_from_slice(&next_hop.0);
                block[9..9 + MAC_SIZE].copy_from_slice(&next_mac);
            }
        }
        block
    }

    pub fn decode(block: &[u8; BLOCK_SIZE]) -> FogResult<Self> {
        match block[0] {
            FLAG_END_OF_PATH => Ok(RoutingBlock::EndOfPath),
            FLAG_FORWARD => {
                let mut id = [0u8; 8];
                id.copy_from_slice(&block[1..9]);
                let mut next_mac = [0u8; MAC_SIZE];
                next_mac.copy_from_slice(&block[9..9 + MAC_SIZE]);
                Ok(RoutingBlock::Forward {
                    next_hop: RelayId(id),
                    next_mac,
                })
            }
            other => Err(FogError::Protocol(format!(
                "unrecognized routing block flag: {other}"
            ))),
        }
    }
}

/// The 176-byte Sphinx header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SphinxHeader {
    pub ephemeral_pub: [u8; 32],
    pub mac: [u8; MAC_SIZE],
    pub routing_info: [u8; ROUTING_INFO_SIZE],
}

impl SphinxHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..32].copy_from_slice(&self.ephemeral_pub);
        out[32..32 + MAC_SIZE].copy_from_slice(&self.mac);
        out[32 + MAC_SIZE..].copy_from_slice(&self.routing_info);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> FogResult<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(FogError::Protocol(format!(
                "header must be exactly {HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut ephemeral_pub = [0u8; 32];
        ephemeral_pub.copy_from_slice(&bytes[0..32]);
        let mut mac = [0u8; MAC_SIZE];
        mac.copy_from_slice(&bytes[32..32 + MAC_SIZE]);
        let mut routing_info = [0u8; ROUTING_INFO_SIZE];
        routing_info.copy_from_slice(&bytes[32 + MAC_SIZE..]);
        Ok(Self {
            ephemeral_pub,
            mac,
            routing_info,
        })
    }
}

/// The full 1200-byte on-wire Sphinx packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SphinxPacket {
    pub header: SphinxHeader,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl SphinxPacket {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + PAYLOAD_SIZE);
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> FogResult<Self> {
        if bytes.len() != HEADER_SIZE + PAYLOAD_SIZE {
            return Err(FogError::Protocol(format!(
                "packet must be exactly {} bytes, got {}",
                HEADER_SIZE + PAYLOAD_SIZE,
                bytes.len()
            )));
        }
        let header = SphinxHeader::from_bytes(&bytes[0..HEADER_SIZE])?;
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[HEADER_SIZE..]);
        Ok(Self { header, payload })
    }
}
