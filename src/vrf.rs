//! Verifiable random function wrapper used by the relay lottery.
//!
//! A thin, feature-gated layer over `schnorrkel`'s VRF: given a keypair and
//! an input message, `prove` deterministically derives a uniform sample in
//! `[0, 1)` plus a proof a third party can check with `verify` against the
//! public key alone (spec §4.4: "the VRF proof is retained and MAY be
//! published so third parties can audit the draw").

#[cfg(feature = "vrf")]
use rand::rngs::OsRng;
#[cfg(feature = "vrf")]
use schnorrkel::{signing_context, Keypair, PublicKey, SignatureError};

use crate::{FogError, FogResult};

const VRF_CONTEXT: &[u8] = b"fogmix-relay-lottery-vrf";

/// A VRF keypair. Feature-gated on `vrf` (schnorrkel); the crate is unusable
/// for lottery draws without it, but other modules still compile.
#[cfg(feature = "vrf")]
pub struct VrfKeyPair {
    inner: Keypair,
}

#[cfg(feature = "vrf")]
impl VrfKeyPair {
    pub fn generate() -> Self {
        Self {
            inner: Keypair::generate_with(OsRng),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.inner.public.to_bytes()
    }

    /// Deterministically prove `input`, returning a uniform sample in
    /// `[0, 1)` and a serialized proof.
    pub fn prove(&self, input: &[u8]) -> VrfOutput {
        let ctx = signing_context(VRF_CONTEXT);
        let (io, proof, _) = self.inner.vrf_sign(ctx.bytes(input));
        let bytes: [u8; 8] = io.make_bytes(b"lottery");
        let sample = (u64::from_be_bytes(bytes) as f64) / (u64::MAX as f64);

        VrfOutput {
            sample,
            proof: proof.to_bytes().to_vec(),
            preout: io.to_preout().to_bytes().to_vec(),
        }
    }
}

/// A VRF draw result: the uniform sample plus everything needed to verify it
/// against the prover's public key.
#[cfg(feature = "vrf")]
#[derive(Debug, Clone)]
pub struct VrfOutput {
    pub sample: f64,
    proof: Vec<u8>,
    preout: Vec<u8>,
}

#[cfg(feature = "vrf")]
impl VrfOutput {
    /// Verify this output was honestly derived from `input` under
    /// `public_key_bytes`.
    pub fn verify(&self, public_key_bytes: &[u8; 32], input: &[u8]) -> FogResult<bool> {
        let public = PublicKey::from_bytes(public_key_bytes)
            .map_err(|e| FogError::Crypto(format!("invalid VRF public key: {e}")))?;
        let preout = schnorrkel::vrf::VRFPreOut::from_bytes(&self.preout)
            .map_err(|e: SignatureError| FogError::Crypto(format!("malformed VRF preout: {e}")))?;
        let proof = schnorrkel::vrf::VRFProof::from_bytes(&self.proof)
            .map_err(|e: SignatureError| FogError::Crypto(format!("malformed VRF proof: {e}")))?;

        let ctx = signing_context(VRF_CONTEXT);
        match public.vrf_verify(ctx.bytes(input), &preout, &proof) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
