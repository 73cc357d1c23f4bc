//! Process-wide configuration for a fogmix node.
//!
//! A single `FogConfig` is constructed once at startup and handed by
//! reference (or as an extracted sub-config) to every subsystem, the same
//! shape the teacher uses for `AdaptiveBatchingConfig` / `CoverTrafficConfig`
//! / `TimingDefenseConfig`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::delay::cover::CoverTrafficMode;
use crate::placement::fallback::FallbackStrategy;

/// Delay scheduler bounds and jitter policy (spec §4.3 / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Mean delay target for the Poisson process.
    pub mean_delay: Duration,
    /// Hard lower bound after clamping.
    pub min_delay: Duration,
    /// Hard upper bound after clamping.
    pub max_delay: Duration,
    /// Jitter magnitude applied after clamping, in `[0, 0.5]`.
    pub jitter_fraction: f64,
    /// Cover traffic policy.
    pub cover_mode: CoverTrafficMode,
    /// Target packets/second when `cover_mode == ConstantRate`.
    pub cover_rate: f64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            mean_delay: Duration::from_millis(500),
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            jitter_fraction: 0.2,
            cover_mode: CoverTrafficMode::Adaptive,
            cover_rate: 10.0,
        }
    }
}

/// Egress batching policy for the mixnode pipeline (spec §4.5 / §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Maximum packets per egress write.
    pub batch_size: usize,
    /// Maximum time to wait for a batch to fill.
    pub batch_timeout_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            batch_timeout_ms: 10,
        }
    }
}

/// NSGA-II placement engine tunables (spec §4.6 / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Population size per generation.
    pub population: usize,
    /// Hard generation cap.
    pub max_generations: usize,
    /// Consecutive generations of stable best-front hypervolume before
    /// declaring convergence.
    pub convergence_window: usize,
    /// Strategy used when no feasible candidate exists within budget.
    pub fallback_strategy: FallbackStrategy,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            population: 100,
            max_generations: 100,
            convergence_window: 10,
            fallback_strategy: FallbackStrategy::LoadBalance,
        }
    }
}

/// Service orchestrator tunables (spec §4.8 / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Maximum automatic restart attempts before giving up.
    pub max_restart_attempts: u32,
    /// Base of the exponential backoff (`backoff_base^attempt` seconds).
    pub backoff_base: f64,
    /// Time allowed for `stop_fn` before force-terminating.
    pub shutdown_timeout: Duration,
    /// Interval between health checks.
    pub health_interval: Duration,
    /// Timeout for a single health check.
    pub health_timeout: Duration,
    /// Timeout for `start_fn`.
    pub start_timeout: Duration,
    /// Consecutive failures before a service is marked Unhealthy.
    pub failure_threshold: u32,
    /// Consecutive successes required to clear a failing streak.
    pub recovery_threshold: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_restart_attempts: 3,
            backoff_base: 2.0,
            shutdown_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            start_timeout: Duration::from_secs(60),
            failure_threshold: 3,
            recovery_threshold: 2,
        }
    }
}

/// Fog coordinator heartbeat policy (spec §4.7 / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Expected interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Absence beyond this window begins the Degraded/Unhealthy escalation.
    pub heartbeat_timeout: Duration,
    /// Cadence of the batch placement dispatcher.
    pub dispatch_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(180),
            dispatch_interval: Duration::from_secs(5),
        }
    }
}

/// Top-level process configuration, one instance per node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FogConfig {
    /// Sphinx protocol constant; hard max is [`crate::MAX_HOPS`].
    pub max_hops: usize,
    /// Replay cache entry lifetime.
    pub replay_window_seconds: u64,
    /// Minimum reputation points for relay-lottery eligibility.
    pub reputation_floor: i32,
    pub delay: DelayConfig,
    pub batching: BatchingConfig,
    pub placement: PlacementConfig,
    pub service: ServiceConfig,
    pub coordinator: CoordinatorConfig,
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            max_hops: crate::MAX_HOPS,
            replay_window_seconds: 3600,
            reputation_floor: 20,
            delay: DelayConfig::default(),
            batching: BatchingConfig::default(),
            placement: PlacementConfig::default(),
            service: ServiceConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl FogConfig {
    /// Validate cross-field invariants not expressible via `Default` alone.
    pub fn validate(&self) -> crate::FogResult<()> {
        if self.max_hops == 0 || self.max_hops > crate::MAX_HOPS {
            return Err(crate::FogError::Config(format!(
                "max_hops must be in 1..={}, got {}",
                crate::MAX_HOPS,
                self.max_hops
            )));
        }
        if self.delay.mean_delay < self.delay.min_delay || self.delay.mean_delay > self.delay.max_delay
        {
            return Err(crate::FogError::Config(
                "mean_delay must lie between min_delay and max_delay".into(),
            ));
        }
        if !(0.0..=0.5).contains(&self.delay.jitter_fraction) {
            return Err(crate::FogError::Config(
                "jitter_fraction must be in [0, 0.5]".into(),
            ));
        }
        Ok(())
    }
}
