//! Sphinx packet construction (`wrap`) and per-hop processing
//! (`process_hop`).
//!
//! `process_hop` runs every verification and decryption step
//! unconditionally before deciding an outcome — a relay never short-circuits
//! on the first failure it notices, so a bad MAC and a replayed tag take the
//! same number of cycles as a clean forward (spec §4.1's timing invariant).

use curve25519_dalek::constants::X25519_BASEPOINT;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;

use crate::replay::{InsertOutcome, ReplayCache};
use crate::sphinx::crypto::{self, HopKeys};
use crate::sphinx::header::{
    RelayId, RoutingBlock, SphinxHeader, SphinxPacket, BLOCK_SIZE, MAC_SIZE, MAX_HOPS,
    PAYLOAD_SIZE, ROUTING_INFO_SIZE,
};
use crate::{FogError, FogResult};

/// Outcome of processing one hop of a Sphinx packet.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// This hop is the end of the path; `payload` is the fully-peeled
    /// plaintext.
    Deliver(Vec<u8>),
    /// Forward `packet` to `next_hop` (resolved to a transport address by
    /// the mixnode's relay directory, not here).
    ForwardTo(RelayId, SphinxPacket),
    /// Header MAC did not verify against the derived key.
    BadMac,
    /// The shared-secret-derived replay tag was already seen within the
    /// configured window.
    Replay,
}

/// Builds Sphinx packets for a chosen forwarding path.
pub struct SphinxEngine;

impl SphinxEngine {
    /// Wrap `payload` for delivery along `path_pubkeys` (X25519 public keys,
    /// sender's hop 0 first, exit last). `path_pubkeys.len()` must be
    /// between 1 and `MAX_HOPS`.
    pub fn wrap(path_pubkeys: &[[u8; 32]], payload: &[u8; PAYLOAD_SIZE]) -> FogResult<SphinxPacket> {
        let k = path_pubkeys.len();
        if k == 0 || k > MAX_HOPS {
            return Err(FogError::Protocol(format!(
                "path length {k} outside 1..={MAX_HOPS}"
            )));
        }

        let (x0, alpha0) = crypto::generate_ephemeral();
        let mut keys: Vec<HopKeys> = Vec::with_capacity(k);
        let mut alphas: Vec<MontgomeryPoint> = Vec::with_capacity(k);
        let mut c = x0;
        let mut alpha = alpha0;
        for pk in path_pubkeys.iter() {
            let peer = MontgomeryPoint(*pk);
            let shared = crypto::diffie_hellman(&c, &peer);
            let hop_keys = crypto::derive_hop_keys(&shared)?;
            alphas.push(alpha);
            c *= hop_keys.blinding_scalar;
            alpha = X25519_BASEPOINT * c;
            keys.push(hop_keys);
        }

        let filler = compute_filler(&keys, k);

        // Backward construction: build C_{k-1} down to C_0.
        let mut next_c: Option<[u8; ROUTING_INFO_SIZE]> = None;
        let mut next_mac: Option<[u8; MAC_SIZE]> = None;
        for i in (0..k).rev() {
            let ks = crypto::keystream(
                &keys[i].routing_key,
                &keys[i].routing_nonce,
                ROUTING_INFO_SIZE,
            );
            let mut d = [0u8; ROUTING_INFO_SIZE];
            if i == k - 1 {
                d[0..BLOCK_SIZE].copy_from_slice(&RoutingBlock::EndOfPath.encode());
                let filler_len = filler.len();
                let start = ROUTING_INFO_SIZE - filler_len;
                d[start..].copy_from_slice(&filler);
            } else {
                let next_hop = RelayId::from_pubkey_bytes(&path_pubkeys[i + 1]);
                let block = RoutingBlock::Forward {
                    next_hop,
                    next_mac: next_mac.expect("mac of later hop computed before this one"),
                };
                d[0..BLOCK_SIZE].copy_from_slice(&block.encode());
                let prev_c = next_c.expect("ciphertext of later hop computed before this one");
                d[BLOCK_SIZE..].copy_from_slice(&prev_c[0..ROUTING_INFO_SIZE - BLOCK_SIZE]);
            }
            let mut c_i = d;
            for (b, k_byte) in c_i.iter_mut().zip(ks.iter()) {
                *b ^= k_byte;
            }
            let mac_i = crypto::mac(&keys[i].mac_key, &c_i, MAC_SIZE);
            let mut mac_arr = [0u8; MAC_SIZE];
            mac_arr.copy_from_slice(&mac_i);
            next_c = Some(c_i);
            next_mac = Some(mac_arr);
        }

        let mut payload_ct = *payload;
        for hop_keys in keys.iter() {
            crypto::stream_xor(&hop_keys.payload_key, &hop_keys.payload_nonce, &mut payload_ct);
        }

        let header = SphinxHeader {
            ephemeral_pub: alphas[0].to_bytes(),
            mac: next_mac.expect("at least one hop"),
            routing_info: next_c.expect("at least one hop"),
        };
        Ok(SphinxPacket {
            header,
            payload: payload_ct,
        })
    }

    /// Process one hop: verify the header MAC, check for replay, peel one
    /// layer off the payload and routing info, and decide whether to
    /// deliver or forward.
    pub fn process_hop(
        private_scalar: &Scalar,
        packet: &SphinxPacket,
        replay: &ReplayCache,
    ) -> FogResult<ProcessOutcome> {
        let replay_tag = blake3::hash(&packet.header.ephemeral_pub).into();
        let replay_outcome = replay.insert(replay_tag);

        let ephemeral = MontgomeryPoint(packet.header.ephemeral_pub);
        let shared = crypto::diffie_hellman(private_scalar, &ephemeral);
        let keys = crypto::derive_hop_keys(&shared)?;

        let mac_ok = crypto::mac_verify(&keys.mac_key, &packet.header.routing_info, &packet.header.mac);

        let mut payload = packet.payload;
        crypto::stream_xor(&keys.payload_key, &keys.payload_nonce, &mut payload);

        let ks = crypto::keystream(
            &keys.routing_key,
            &keys.routing_nonce,
            ROUTING_INFO_SIZE + BLOCK_SIZE,
        );
        let mut d = [0u8; ROUTING_INFO_SIZE];
        for (i, b) in d.iter_mut().enumerate() {
            *b = packet.header.routing_info[i] ^ ks[i];
        }
        let mut revealed_block = [0u8; BLOCK_SIZE];
        revealed_block.copy_from_slice(&d[0..BLOCK_SIZE]);
        let decoded = RoutingBlock::decode(&revealed_block);

        let mut shifted = [0u8; ROUTING_INFO_SIZE];
        shifted[0..ROUTING_INFO_SIZE - BLOCK_SIZE].copy_from_slice(&d[BLOCK_SIZE..]);
        shifted[ROUTING_INFO_SIZE - BLOCK_SIZE..]
            .copy_from_slice(&ks[ROUTING_INFO_SIZE..ROUTING_INFO_SIZE + BLOCK_SIZE]);

        let next_alpha = ephemeral * keys.blinding_scalar;

        // An undecodable block only ever arises from a MAC/key mismatch
        // (a genuine peer always writes a recognized flag byte), so fold it
        // into BadMac rather than surfacing a distinct error variant.
        let revealed = match decoded {
            Ok(block) => block,
            Err(_) => return Ok(ProcessOutcome::BadMac),
        };

        if !mac_ok {
            return Ok(ProcessOutcome::BadMac);
        }
        if replay_outcome == InsertOutcome::AlreadyPresent {
            return Ok(ProcessOutcome::Replay);
        }

        match revealed {
            RoutingBlock::EndOfPath => Ok(ProcessOutcome::Deliver(payload.to_vec())),
            RoutingBlock::Forward { next_hop, next_mac } => {
                let next_header = SphinxHeader {
                    ephemeral_pub: next_alpha.to_bytes(),
                    mac: next_mac,
                    routing_info: shifted,
                };
                Ok(ProcessOutcome::ForwardTo(
                    next_hop,
                    SphinxPacket {
                        header: next_header,
                        payload,
                    },
                ))
            }
        }
    }
}

/// The filler string seeds the last hop's decrypted tail so that each
/// earlier hop's forward peel reproduces, byte for byte, the ciphertext the
/// sender built for the next hop. Without it the header would have to grow
/// by one block's worth of fresh randomness per hop, which a fixed-size
/// header can't absorb.
///
/// Chunk `n` (1-indexed from the header's tail, `n` in `1..=k-1`) is the XOR
/// of the `d`-th-from-last hop's keystream evaluated at the offset that hop
/// will read when peeling, for every `d` in `0..=n`. `d = 0` is the last hop
/// reading its own tail; `d = n` is the earliest contributing hop reading
/// its continuation bytes (`routing_info_size..routing_info_size+block`).
fn compute_filler(keys: &[HopKeys], k: usize) -> Vec<u8> {
    if k == 1 {
        return Vec::new();
    }
    let filler_len = (k - 1) * BLOCK_SIZE;
    let mut filler = vec![0u8; filler_len];
    for n in 1..=(k - 1) {
        let mut chunk = [0u8; BLOCK_SIZE];
        for d in 0..=n {
            let i = k - 1 - d;
            let ks = crypto::keystream(
                &keys[i].routing_key,
                &keys[i].routing_nonce,
                ROUTING_INFO_SIZE + BLOCK_SIZE,
            );
            let offset = ROUTING_INFO_SIZE - (n - d) * BLOCK_SIZE;
            for (c, k_byte) in chunk.iter_mut().zip(ks[offset..offset + BLOCK_SIZE].iter()) {
                *c ^= k_byte;
            }
        }
        let start = filler_len - n * BLOCK_SIZE;
        filler[start..start + BLOCK_SIZE].copy_from_slice(&chunk);
    }
    filler
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn keypair() -> (Scalar, [u8; 32]) {
        let (s, p) = crypto::generate_ephemeral();
        (s, p.to_bytes())
    }

    #[test]
    fn single_hop_round_trips_and_delivers() {
        let (sk, pk) = keypair();
        let payload = [42u8; PAYLOAD_SIZE];
        let packet = SphinxEngine::wrap(&[pk], &payload).unwrap();
        let replay = ReplayCache::new(Duration::from_secs(60));
        match SphinxEngine::process_hop(&sk, &packet, &replay).unwrap() {
            ProcessOutcome::Deliver(out) => assert_eq!(out, payload.to_vec()),
            other => panic!("expected Deliver, got {other:?}"),
        }
    }

    #[test]
    fn three_hop_path_forwards_through_every_relay_and_delivers() {
        let hops: Vec<(Scalar, [u8; 32])> = (0..3).map(|_| keypair()).collect();
        let pubkeys: Vec<[u8; 32]> = hops.iter().map(|(_, p)| *p).collect();
        let payload = [7u8; PAYLOAD_SIZE];
        let mut packet = SphinxEngine::wrap(&pubkeys, &payload).unwrap();
        let replay = ReplayCache::new(Duration::from_secs(60));

        for (idx, (sk, _)) in hops.iter().enumerate() {
            match SphinxEngine::process_hop(sk, &packet, &replay).unwrap() {
                ProcessOutcome::ForwardTo(_, next) if idx < hops.len() - 1 => packet = next,
                ProcessOutcome::Deliver(out) if idx == hops.len() - 1 => {
                    assert_eq!(out, payload.to_vec());
                    return;
                }
                other => panic!("unexpected outcome at hop {idx}: {other:?}"),
            }
        }
        panic!("loop should have returned at the last hop");
    }

    #[test]
    fn five_hop_path_round_trips() {
        let hops: Vec<(Scalar, [u8; 32])> = (0..MAX_HOPS).map(|_| keypair()).collect();
        let pubkeys: Vec<[u8; 32]> = hops.iter().map(|(_, p)| *p).collect();
        let payload = [200u8; PAYLOAD_SIZE];
        let mut packet = SphinxEngine::wrap(&pubkeys, &payload).unwrap();
        let replay = ReplayCache::new(Duration::from_secs(60));

        for (idx, (sk, _)) in hops.iter().enumerate() {
            match SphinxEngine::process_hop(sk, &packet, &replay).unwrap() {
                ProcessOutcome::ForwardTo(_, next) if idx < hops.len() - 1 => packet = next,
                ProcessOutcome::Deliver(out) if idx == hops.len() - 1 => {
                    assert_eq!(out, payload.to_vec());
                    return;
                }
                other => panic!("unexpected outcome at hop {idx}: {other:?}"),
            }
        }
        panic!("loop should have returned at the last hop");
    }

    #[test]
    fn tampered_header_mac_is_rejected() {
        let (sk, pk) = keypair();
        let payload = [1u8; PAYLOAD_SIZE];
        let mut packet = SphinxEngine::wrap(&[pk], &payload).unwrap();
        packet.header.mac[0] ^= 0xFF;
        let replay = ReplayCache::new(Duration::from_secs(60));
        match SphinxEngine::process_hop(&sk, &packet, &replay).unwrap() {
            ProcessOutcome::BadMac => {}
            other => panic!("expected BadMac, got {other:?}"),
        }
    }

    #[test]
    fn replayed_packet_is_flagged_on_second_delivery() {
        let (sk, pk) = keypair();
        let payload = [1u8; PAYLOAD_SIZE];
        let packet = SphinxEngine::wrap(&[pk], &payload).unwrap();
        let replay = ReplayCache::new(Duration::from_secs(60));
        assert!(matches!(
            SphinxEngine::process_hop(&sk, &packet, &replay).unwrap(),
            ProcessOutcome::Deliver(_)
        ));
        assert!(matches!(
            SphinxEngine::process_hop(&sk, &packet, &replay).unwrap(),
            ProcessOutcome::Replay
        ));
    }

    #[test]
    fn path_longer_than_max_hops_is_rejected() {
        let pubkeys: Vec<[u8; 32]> = (0..MAX_HOPS + 1).map(|_| keypair().1).collect();
        let payload = [0u8; PAYLOAD_SIZE];
        assert!(SphinxEngine::wrap(&pubkeys, &payload).is_err());
    }
}
