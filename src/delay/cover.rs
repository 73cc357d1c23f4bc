//! Cover traffic generation for traffic-analysis resistance.
//!
//! Cover packets are full-size dummy Sphinx packets (`crate::PACKET_SIZE`
//! bytes) that traverse the same wrap/release path as real traffic and are
//! indistinguishable on the wire — spec §4.3 fixes packet size as invariant,
//! so unlike the teacher's generator this one never varies packet size to
//! "blend in"; only inter-packet timing is shaped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::PACKET_SIZE;

/// Cover traffic generation mode (spec §4.3 / §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverTrafficMode {
    /// Emit dummy packets at a fixed target rate.
    ConstantRate,
    /// Shape cover to match the observed real-traffic interval distribution.
    Adaptive,
    /// Short bursts timed to mask message-end boundaries.
    Burst,
    /// No cover traffic.
    Off,
}

/// Cover traffic tunables (spec §4.3 / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverTrafficConfig {
    pub mode: CoverTrafficMode,
    /// Target cover rate in packets/second for `ConstantRate` and as the
    /// fallback for `Adaptive`/`Burst` before any real traffic is observed.
    pub target_rate: f64,
    /// Bandwidth overhead ceiling as a fraction of real traffic bytes
    /// (spec §4.3: "Bandwidth overhead target: ≤5%").
    pub max_bandwidth_overhead: f64,
    /// Required interval-distribution similarity for `Adaptive` mode
    /// (spec §4.3: "within ±20% variance").
    pub adaptive_variance: f64,
}

impl Default for CoverTrafficConfig {
    fn default() -> Self {
        Self {
            mode: CoverTrafficMode::Adaptive,
            target_rate: 10.0,
            max_bandwidth_overhead: 0.05,
            adaptive_variance: 0.2,
        }
    }
}

/// Running interval statistics for real traffic, used to shape `Adaptive`
/// cover and to score indistinguishability.
#[derive(Debug, Clone, Default)]
pub struct TrafficStatistics {
    pub avg_interval_ms: f64,
    pub interval_std_dev_ms: f64,
    pub packet_count: u64,
}

impl TrafficStatistics {
    fn record_interval(&mut self, interval_ms: f64) {
        self.packet_count += 1;
        let n = self.packet_count as f64;
        let old_avg = self.avg_interval_ms;
        self.avg_interval_ms = old_avg + (interval_ms - old_avg) / n;
        if self.packet_count > 1 {
            let dev = interval_ms - self.avg_interval_ms;
            self.interval_std_dev_ms =
                ((self.interval_std_dev_ms.powi(2) * (n - 2.0) + dev * (interval_ms - old_avg))
                    / (n - 1.0))
                    .sqrt();
        }
    }

    /// Coefficient-of-variation similarity between this and `other`, in
    /// `[0, 1]`; 1.0 is perfectly indistinguishable.
    pub fn similarity_score(&self, other: &TrafficStatistics) -> f64 {
        if self.packet_count < 2 || other.packet_count < 2 {
            return 0.0;
        }
        let cv_self = self.interval_std_dev_ms / self.avg_interval_ms.max(1e-9);
        let cv_other = other.interval_std_dev_ms / other.avg_interval_ms.max(1e-9);
        (1.0 - (cv_self - cv_other).abs() / (cv_self + cv_other).max(1e-9)).clamp(0.0, 1.0)
    }
}

/// Generates fixed-size dummy packets timed per the configured cover mode,
/// tracking bandwidth overhead against observed real traffic.
pub struct CoverTrafficGenerator {
    config: CoverTrafficConfig,
    packets_sent: AtomicU64,
    real_stats: Mutex<TrafficStatistics>,
    cover_stats: Mutex<TrafficStatistics>,
    last_real_packet: Mutex<Option<Instant>>,
    rng: Mutex<StdRng>,
}

impl CoverTrafficGenerator {
    pub fn new(config: CoverTrafficConfig) -> Self {
        Self {
            config,
            packets_sent: AtomicU64::new(0),
            real_stats: Mutex::new(TrafficStatistics::default()),
            cover_stats: Mutex::new(TrafficStatistics::default()),
            last_real_packet: Mutex::new(None),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Record one real packet's arrival for interval tracking.
    pub async fn observe_real_packet(&self) {
        let mut last = self.last_real_packet.lock().await;
        if let Some(prev) = *last {
            let interval_ms = prev.elapsed().as_secs_f64() * 1000.0;
            self.real_stats.lock().await.record_interval(interval_ms);
        }
        *last = Some(Instant::now());
    }

    /// Produce one cover packet, or `None` if cover traffic is off or would
    /// push overhead past `max_bandwidth_overhead`.
    pub async fn generate_cover_packet(&self) -> Option<Vec<u8>> {
        if self.config.mode == CoverTrafficMode::Off {
            return None;
        }
        let overhead = self.bandwidth_overhead().await;
        if overhead > self.config.max_bandwidth_overhead {
            debug!(
                overhead = overhead,
                limit = self.config.max_bandwidth_overhead,
                "skipping cover packet: overhead would exceed budget"
            );
            return None;
        }
        let interval_ms = self.cover_interval().await.as_secs_f64() * 1000.0;
        self.cover_stats.lock().await.record_interval(interval_ms);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        Some(vec![0u8; PACKET_SIZE])
    }

    async fn bandwidth_overhead(&self) -> f64 {
        let real = self.real_stats.lock().await;
        if real.packet_count == 0 {
            return 0.0;
        }
        let cover_bytes = self.packets_sent.load(Ordering::Relaxed) as f64 * PACKET_SIZE as f64;
        let real_bytes = real.packet_count as f64 * PACKET_SIZE as f64;
        cover_bytes / real_bytes.max(1.0)
    }

    /// Interval to wait before the next cover packet, per mode.
    pub async fn cover_interval(&self) -> Duration {
        match self.config.mode {
            CoverTrafficMode::Off => Duration::from_secs(u64::MAX / 2),
            CoverTrafficMode::ConstantRate => rate_interval(self.config.target_rate),
            CoverTrafficMode::Adaptive => {
                let real = self.real_stats.lock().await;
                if real.packet_count >= 2 {
                    Duration::from_secs_f64((real.avg_interval_ms / 1000.0).max(0.0))
                } else {
                    rate_interval(self.config.target_rate)
                }
            }
            CoverTrafficMode::Burst => {
                let base = 1.0 / self.config.target_rate.max(1e-9);
                let variability = base * 0.5;
                let mut rng = self.rng.lock().await;
                let offset = (rng.gen::<f64>() - 0.5) * 2.0 * variability;
                Duration::from_secs_f64((base + offset).max(0.001))
            }
        }
    }

    /// Similarity between cover and real interval distributions, `1.0` is
    /// perfectly indistinguishable.
    pub async fn indistinguishability(&self) -> f64 {
        let cover = self.cover_stats.lock().await.clone();
        self.real_stats.lock().await.similarity_score(&cover)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }
}

fn rate_interval(rate: f64) -> Duration {
    if rate > 0.0 {
        Duration::from_secs_f64(1.0 / rate)
    } else {
        Duration::from_secs(1)
    }
}
