//! Reputation-weighted, VRF-seeded relay selection (spec §4.4).
//!
//! Selection is deterministic given the same `(circuit_id, hop_index)` input
//! and lottery keypair: the VRF output on that input *is* the uniform sample
//! used to walk the weight CDF, not an optional audit layer bolted onto a
//! separately-randomized draw.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::reputation::NodeReputation;
use crate::{FogError, FogResult};

#[cfg(feature = "vrf")]
use crate::vrf::VrfKeyPair;

/// One relay as the lottery sees it: enough to compute a weight and to
/// return an address on selection.
#[derive(Debug, Clone)]
pub struct LotteryEntry {
    pub address: SocketAddr,
    pub reputation_score: f64,
    pub age_days: u32,
}

impl LotteryEntry {
    pub fn from_reputation(node: &NodeReputation) -> Self {
        Self {
            address: node.address,
            reputation_score: node.score(),
            age_days: node.age_days,
        }
    }

    fn age_factor(&self) -> f64 {
        1.0 + self.age_days as f64 / 365.0
    }

    fn weight(&self) -> f64 {
        self.reputation_score * self.age_factor()
    }
}

/// A draw's outcome, retained so it can be independently re-verified.
#[derive(Debug, Clone)]
pub struct LotteryProof {
    pub input: Vec<u8>,
    pub selected: SocketAddr,
    #[cfg(feature = "vrf")]
    pub vrf_public_key: [u8; 32],
}

/// Selects a relay by walking a weight CDF at a VRF-derived uniform point.
pub struct RelayLottery {
    #[cfg(feature = "vrf")]
    keypair: VrfKeyPair,
    reputation_floor: f64,
}

impl RelayLottery {
    #[cfg(feature = "vrf")]
    pub fn new(reputation_floor: f64) -> Self {
        Self {
            keypair: VrfKeyPair::generate(),
            reputation_floor,
        }
    }

    #[cfg(feature = "vrf")]
    pub fn vrf_public_key(&self) -> [u8; 32] {
        self.keypair.public_key_bytes()
    }

    /// Draw a relay for `circuit_id`/`hop_index` from `candidates`, excluding
    /// any entry at or below `reputation_floor`.
    #[cfg(feature = "vrf")]
    pub fn draw(
        &self,
        candidates: &[LotteryEntry],
        circuit_id: u64,
        hop_index: u8,
    ) -> FogResult<(SocketAddr, LotteryProof)> {
        let eligible: Vec<&LotteryEntry> = candidates
            .iter()
            .filter(|c| c.reputation_score > self.reputation_floor)
            .collect();
        if eligible.is_empty() {
            return Err(FogError::ResourceExhausted(
                "no relay meets the reputation floor".into(),
            ));
        }

        let input = lottery_input(circuit_id, hop_index);
        let output = self.keypair.prove(&input);

        let total_weight: f64 = eligible.iter().map(|c| c.weight()).sum();
        let target = output.sample * total_weight;

        let mut cumulative = 0.0;
        let mut selected = eligible[eligible.len() - 1].address;
        for entry in &eligible {
            cumulative += entry.weight();
            if target < cumulative {
                selected = entry.address;
                break;
            }
        }

        Ok((
            selected,
            LotteryProof {
                input,
                selected,
                vrf_public_key: self.keypair.public_key_bytes(),
            },
        ))
    }
}

fn lottery_input(circuit_id: u64, hop_index: u8) -> Vec<u8> {
    let mut input = Vec::with_capacity(9);
    input.extend_from_slice(&circuit_id.to_be_bytes());
    input.push(hop_index);
    input
}

/// Exclusion-only eligibility check shared with relay-directory maintenance.
pub fn eligible_map(entries: &[LotteryEntry], floor: f64) -> HashMap<SocketAddr, &LotteryEntry> {
    entries
        .iter()
        .filter(|e| e.reputation_score > floor)
        .map(|e| (e.address, e))
        .collect()
}
