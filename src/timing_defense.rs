//! Diagnostic instrument over the timing invariants the pipeline already
//! enforces by construction (spec §4.1 Sphinx `Reject` must not leak timing;
//! §4.3 delays indistinguishable from cover traffic). This module does not
//! change protocol behavior — it measures it, for the property tests backing
//! those invariants.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

/// Bound on how many recent samples feed the correlation/entropy estimate.
#[derive(Debug, Clone, Copy)]
pub struct TimingDefenseConfig {
    pub window_size: usize,
}

impl Default for TimingDefenseConfig {
    fn default() -> Self {
        Self { window_size: 200 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    original_delay_ms: f64,
    actual_delay_ms: f64,
}

/// Fed one (original_delay, actual_delay) pair per scheduled packet; exposes
/// correlation, variance, and entropy over the running window.
pub struct TimingDefenseMonitor {
    config: TimingDefenseConfig,
    history: Arc<Mutex<VecDeque<Sample>>>,
}

impl TimingDefenseMonitor {
    pub fn new(config: TimingDefenseConfig) -> Self {
        Self {
            history: Arc::new(Mutex::new(VecDeque::with_capacity(config.window_size))),
            config,
        }
    }

    pub async fn record(&self, original_delay: Duration, actual_delay: Duration) {
        let mut history = self.history.lock().await;
        history.push_back(Sample {
            original_delay_ms: original_delay.as_secs_f64() * 1000.0,
            actual_delay_ms: actual_delay.as_secs_f64() * 1000.0,
        });
        while history.len() > self.config.window_size {
            history.pop_front();
        }
    }

    /// Pearson correlation between scheduled and actually-released delay.
    /// Near zero means an observer of arrival times learns nothing about the
    /// original jitter the scheduler picked.
    pub async fn correlation(&self) -> f64 {
        let history = self.history.lock().await;
        if history.len() < 2 {
            return 0.0;
        }

        let n = history.len() as f64;
        let mean_original =
            history.iter().map(|s| s.original_delay_ms).sum::<f64>() / n;
        let mean_actual = history.iter().map(|s| s.actual_delay_ms).sum::<f64>() / n;

        let mut numerator = 0.0;
        let mut sum_sq_original = 0.0;
        let mut sum_sq_actual = 0.0;
        for sample in history.iter() {
            let diff_original = sample.original_delay_ms - mean_original;
            let diff_actual = sample.actual_delay_ms - mean_actual;
            numerator += diff_original * diff_actual;
            sum_sq_original += diff_original * diff_original;
            sum_sq_actual += diff_actual * diff_actual;
        }

        let denominator = (sum_sq_original * sum_sq_actual).sqrt();
        if denominator == 0.0 {
            0.0
        } else {
            numerator / denominator
        }
    }

    /// Variance of actual delay, in ms². Higher means harder to predict.
    pub async fn variance(&self) -> f64 {
        let history = self.history.lock().await;
        if history.is_empty() {
            return 0.0;
        }
        let n = history.len() as f64;
        let mean = history.iter().map(|s| s.actual_delay_ms).sum::<f64>() / n;
        history
            .iter()
            .map(|s| (s.actual_delay_ms - mean).powi(2))
            .sum::<f64>()
            / n
    }

    /// Shannon entropy (bits) of the actual-delay distribution over
    /// `num_bins` equal-width bins.
    pub async fn entropy(&self, num_bins: usize) -> f64 {
        let history = self.history.lock().await;
        if history.len() < 10 {
            return 0.0;
        }

        let delays: Vec<f64> = history.iter().map(|s| s.actual_delay_ms).collect();
        let min_delay = delays.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_delay = delays.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let bin_width = (max_delay - min_delay) / num_bins as f64;
        if bin_width == 0.0 {
            return 0.0;
        }

        let mut bin_counts = vec![0usize; num_bins];
        for &delay in &delays {
            let bin_idx = (((delay - min_delay) / bin_width).floor() as usize).min(num_bins - 1);
            bin_counts[bin_idx] += 1;
        }

        let total = delays.len() as f64;
        bin_counts
            .iter()
            .filter(|&&count| count > 0)
            .map(|&count| {
                let p = count as f64 / total;
                -p * p.log2()
            })
            .sum()
    }

    /// Weighted combination of (1 − |correlation|), normalized variance, and
    /// normalized entropy into a single 0–1 resistance score.
    pub async fn resistance_score(&self) -> f64 {
        let correlation_score = (1.0 - self.correlation().await.abs()).clamp(0.0, 1.0);
        let variance_score = (self.variance().await / 10_000.0).min(1.0);
        let entropy_score = (self.entropy(20).await / 4.32).min(1.0);
        correlation_score * 0.3 + variance_score * 0.3 + entropy_score * 0.4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uniform_delays_have_zero_variance_and_entropy() {
        let monitor = TimingDefenseMonitor::new(TimingDefenseConfig::default());
        for _ in 0..20 {
            monitor
                .record(Duration::from_millis(50), Duration::from_millis(50))
                .await;
        }
        assert_eq!(monitor.variance().await, 0.0);
        assert_eq!(monitor.entropy(20).await, 0.0);
    }

    #[tokio::test]
    async fn varied_delays_produce_positive_entropy_and_variance() {
        let monitor = TimingDefenseMonitor::new(TimingDefenseConfig::default());
        for i in 0..50u64 {
            let delay = Duration::from_millis(10 + (i % 15) * 7);
            monitor.record(delay, delay).await;
        }
        assert!(monitor.variance().await > 0.0);
        assert!(monitor.entropy(20).await > 0.0);
    }

    #[tokio::test]
    async fn window_evicts_oldest_samples() {
        let monitor = TimingDefenseMonitor::new(TimingDefenseConfig { window_size: 5 });
        for i in 0..10u64 {
            monitor
                .record(Duration::from_millis(i), Duration::from_millis(i))
                .await;
        }
        assert_eq!(monitor.history.lock().await.len(), 5);
    }

    #[tokio::test]
    async fn resistance_score_stays_in_unit_range() {
        let monitor = TimingDefenseMonitor::new(TimingDefenseConfig::default());
        for i in 0..100u64 {
            monitor
                .record(Duration::from_millis(20), Duration::from_millis(20 + i % 30))
                .await;
        }
        let score = monitor.resistance_score().await;
        assert!((0.0..=1.0).contains(&score));
    }
}
