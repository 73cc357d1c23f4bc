//! Key derivation and symmetric primitives backing the Sphinx engine.
//!
//! Every per-hop key is derived from a single X25519 shared secret via
//! HKDF-SHA256 with a pinned, domain-separating info string per use. The
//! payload and routing-info ciphers are plain ChaCha20 (no AEAD tag):
//! integrity is carried by the header MAC alone, verified before any
//! decryption happens (spec §4.1).

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use curve25519_dalek::constants::X25519_BASEPOINT;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use hkdf::Hkdf;
use sha2::Sha256;

use crate::{FogError, FogResult};

const CONTEXT_MAC: &[u8] = b"fogmix-sphinx-v1-mac";
const CONTEXT_STREAM: &[u8] = b"fogmix-sphinx-v1-stream";
const CONTEXT_BLIND: &[u8] = b"fogmix-sphinx-v1-blind";

/// Every symmetric key a single hop needs, derived once from its shared
/// secret with the sender.
pub struct HopKeys {
    pub mac_key: [u8; 32],
    pub payload_key: [u8; 32],
    pub payload_nonce: [u8; 12],
    pub routing_key: [u8; 32],
    pub routing_nonce: [u8; 12],
    pub blinding_scalar: Scalar,
}

/// Derive all per-hop keys from a Diffie-Hellman shared secret.
pub fn derive_hop_keys(shared_secret: &MontgomeryPoint) -> FogResult<HopKeys> {
    let ikm = shared_secret.to_bytes();
    let hk = Hkdf::<Sha256>::new(None, &ikm);

    let mut mac_key = [0u8; 32];
    hk.expand(CONTEXT_MAC, &mut mac_key)
        .map_err(|e| FogError::Crypto(format!("hkdf mac expand: {e}")))?;

    let mut stream_material = [0u8; 88];
    hk.expand(CONTEXT_STREAM, &mut stream_material)
        .map_err(|e| FogError::Crypto(format!("hkdf stream expand: {e}")))?;
    let mut payload_key = [0u8; 32];
    let mut payload_nonce = [0u8; 12];
    let mut routing_key = [0u8; 32];
    let mut routing_nonce = [0u8; 12];
    payload_key.copy_from_slice(&stream_material[0..32]);
    payload_nonce.copy_from_slice(&stream_material[32..44]);
    routing_key.copy_from_slice(&stream_material[44..76]);
    routing_nonce.copy_from_slice(&stream_material[76..88]);

    let mut blind_material = [0u8; 32];
    hk.expand(CONTEXT_BLIND, &mut blind_material)
        .map_err(|e| FogError::Crypto(format!("hkdf blind expand: {e}")))?;
    let blinding_scalar = Scalar::from_bytes_mod_order(blind_material);

    Ok(HopKeys {
        mac_key,
        payload_key,
        payload_nonce,
        routing_key,
        routing_nonce,
        blinding_scalar,
    })
}

/// Keyed BLAKE3 MAC over `data`, truncated to `len` bytes.
pub fn mac(key: &[u8; 32], data: &[u8], len: usize) -> Vec<u8> {
    let hash = blake3::Hasher::new_keyed(key).update(data).finalize();
    hash.as_bytes()[..len].to_vec()
}

/// Constant-time MAC comparison.
pub fn mac_verify(key: &[u8; 32], data: &[u8], expected: &[u8]) -> bool {
    let computed = mac(key, data, expected.len());
    use subtle::ConstantTimeEq;
    computed.ct_eq(expected).into()
}

/// Generate `len` bytes of ChaCha20 keystream under `(key, nonce)`.
pub fn keystream(key: &[u8; 32], nonce: &[u8; 12], len: usize) -> Vec<u8> {
    let mut cipher = ChaCha20::new(key.into(), nonce.into());
    let mut buf = vec![0u8; len];
    cipher.apply_keystream(&mut buf);
    buf
}

/// XOR `data` in place with the ChaCha20 keystream under `(key, nonce)`.
pub fn stream_xor(key: &[u8; 32], nonce: &[u8; 12], data: &mut [u8]) {
    let mut cipher = ChaCha20::new(key.into(), nonce.into());
    cipher.apply_keystream(data);
}

/// Base ephemeral keypair for `Wrap`: a fresh scalar and its basepoint
/// multiple, the packet's initial `ephemeral_pub`.
pub fn generate_ephemeral() -> (Scalar, MontgomeryPoint) {
    let mut bytes = [0u8; 32];
    rand_core::RngCore::fill_bytes(&mut rand_core::OsRng, &mut bytes);
    let scalar = Scalar::from_bytes_mod_order(bytes);
    (scalar, X25519_BASEPOINT * scalar)
}

/// Diffie-Hellman shared secret between a local scalar and a peer's
/// Montgomery point.
pub fn diffie_hellman(scalar: &Scalar, peer_point: &MontgomeryPoint) -> MontgomeryPoint {
    peer_point * scalar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_keys_are_deterministic_given_same_secret() {
        let (scalar, _) = generate_ephemeral();
        let point = X25519_BASEPOINT * scalar;
        let a = derive_hop_keys(&point).unwrap();
        let b = derive_hop_keys(&point).unwrap();
        assert_eq!(a.mac_key, b.mac_key);
        assert_eq!(a.payload_key, b.payload_key);
        assert_eq!(a.routing_key, b.routing_key);
    }

    #[test]
    fn stream_xor_round_trips() {
        let key = [1u8; 32];
        let nonce = [2u8; 12];
        let mut data = b"hello fog mixnet".to_vec();
        let original = data.clone();
        stream_xor(&key, &nonce, &mut data);
        assert_ne!(data, original);
        stream_xor(&key, &nonce, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn mac_verify_detects_tamper() {
        let key = [5u8; 32];
        let data = b"routing-info-blob";
        let tag = mac(&key, data, 24);
        assert!(mac_verify(&key, data, &tag));
        let mut tampered = data.to_vec();
        tampered[0] ^= 1;
        assert!(!mac_verify(&key, &tampered, &tag));
    }

    #[test]
    fn keystream_extends_consistently() {
        let key = [9u8; 32];
        let nonce = [3u8; 12];
        let short = keystream(&key, &nonce, 16);
        let long = keystream(&key, &nonce, 32);
        assert_eq!(&long[0..16], &short[..]);
    }
}
