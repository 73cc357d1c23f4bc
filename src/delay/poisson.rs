//! Poisson-distributed per-packet delay.
//!
//! Delay is computed in four steps, in this exact order: sample the
//! exponential inter-arrival time at a load-adjusted rate, clamp to
//! `[min_delay, max_delay]`, scale by the circuit multiplier, then apply
//! jitter. Clamping before the circuit multiplier keeps a multiplier of
//! e.g. `5.0` from reintroducing a heavy tail the clamp was meant to cut off.

use std::time::Duration;

use rand_core::RngCore;

use crate::config::DelayConfig;
use crate::{FogError, FogResult};

/// A per-circuit delay multiplier, restricted to `[0.1, 10]` per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitMultiplier(f64);

impl CircuitMultiplier {
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.1, 10.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for CircuitMultiplier {
    fn default() -> Self {
        Self(1.0)
    }
}

/// Samples Sphinx forwarding delays per the spec §4.3 formula.
pub struct PoissonDelayGenerator {
    mean_delay: Duration,
    min_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
    load_factor: f64,
}

impl PoissonDelayGenerator {
    pub fn new(config: &DelayConfig) -> FogResult<Self> {
        if config.mean_delay < config.min_delay || config.mean_delay > config.max_delay {
            return Err(FogError::Config(
                "mean_delay must lie between min_delay and max_delay".into(),
            ));
        }
        if !(0.0..=0.5).contains(&config.jitter_fraction) {
            return Err(FogError::Config("jitter_fraction must be in [0, 0.5]".into()));
        }
        Ok(Self {
            mean_delay: config.mean_delay,
            min_delay: config.min_delay,
            max_delay: config.max_delay,
            jitter_fraction: config.jitter_fraction,
            load_factor: 0.0,
        })
    }

    /// Set the current queue-depth-derived load in `[0, 1]`. Higher load
    /// shortens the expected delay (throughput pressure), per spec §4.3.
    pub fn set_load_factor(&mut self, load_factor: f64) {
        self.load_factor = load_factor.clamp(0.0, 1.0);
    }

    /// Sample one delay for a packet on `circuit_multiplier`.
    pub fn sample(&self, circuit_multiplier: CircuitMultiplier) -> Duration {
        let mean_ms = self.mean_delay.as_secs_f64() * 1000.0;
        let lambda_eff = (1.0 / mean_ms) * (1.0 - 0.5 * self.load_factor);

        let u = uniform_open_unit();
        let d0 = -u.ln() / lambda_eff;

        let min_ms = self.min_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let d1 = d0.clamp(min_ms, max_ms);

        let d2 = d1 * circuit_multiplier.value();

        let v = uniform_half_open_unit();
        let d3 = d2 * (1.0 + (2.0 * v - 1.0) * self.jitter_fraction);

        Duration::from_secs_f64((d3 / 1000.0).max(0.0))
    }
}

/// Uniform sample in the open interval `(0, 1)`, required so `-ln(U)` never
/// diverges at `U = 0`.
fn uniform_open_unit() -> f64 {
    loop {
        let u = uniform_half_open_unit();
        if u > 0.0 {
            return u;
        }
    }
}

/// Uniform sample in `[0, 1)` drawn from a cryptographically-strong PRNG
/// (spec §4.3: "the generator MUST use a cryptographically-strong PRNG").
fn uniform_half_open_unit() -> f64 {
    let mut bytes = [0u8; 8];
    rand_core::OsRng.fill_bytes(&mut bytes);
    // Top 53 bits give a uniform double in [0, 1), matching the precision
    // a standard f64 mantissa can represent exactly.
    let bits = u64::from_be_bytes(bytes) >> 11;
    (bits as f64) / ((1u64 << 53) as f64)
}
