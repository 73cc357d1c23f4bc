//! Wires the mixnode hop together: carrier ingress -> Sphinx -> delay ->
//! lottery -> batched carrier egress (spec §4.5).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use curve25519_dalek::scalar::Scalar;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::config::{BatchingConfig, DelayConfig};
use crate::delay::poisson::{CircuitMultiplier, PoissonDelayGenerator};
use crate::delay::scheduler::DelayScheduler;
use crate::lottery::{LotteryEntry, RelayLottery};
use crate::mixnode::carrier::{self, CarrierConfig, RelayDirectory};
use crate::replay::ReplayCache;
use crate::sphinx::engine::{ProcessOutcome, SphinxEngine};
use crate::sphinx::header::{RelayId, SphinxPacket};
use crate::{FogError, FogResult, PACKET_SIZE};

/// Sentinel next-hop id meaning "not source-routed; let the lottery pick"
/// (spec §4.5: "lottery is used only for loose-source routing and cover
/// traffic").
pub const LOTTERY_ROUTED: RelayId = RelayId([0u8; 8]);

/// Counters for the pipeline's terminal outcomes.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub ingressed: AtomicU64,
    pub delivered: AtomicU64,
    pub forwarded: AtomicU64,
    pub dropped_bad_mac: AtomicU64,
    pub dropped_replay: AtomicU64,
    pub dropped_transmit_error: AtomicU64,
    pub dropped_corrupt_shape: AtomicU64,
    pub refused_queue_full: AtomicU64,
}

struct EgressJob {
    destination: SocketAddr,
    packet_bytes: Vec<u8>,
}

/// Ties together a single mixnode hop's Sphinx processing, delay,
/// lottery-based forwarding, and batched carrier egress.
pub struct MixnodePipeline {
    private_scalar: Scalar,
    replay: Arc<ReplayCache>,
    delay_gen: Arc<Mutex<PoissonDelayGenerator>>,
    scheduler: Arc<DelayScheduler<EgressJob>>,
    lottery: Arc<RelayLottery>,
    directory: Arc<RelayDirectory>,
    batching: BatchingConfig,
    stats: Arc<PipelineStats>,
    ingress_capacity: usize,
    deliver_tx: mpsc::Sender<Vec<u8>>,
}

impl MixnodePipeline {
    #[cfg(feature = "vrf")]
    pub fn new(
        private_scalar: Scalar,
        replay_window: Duration,
        delay_config: &DelayConfig,
        batching: BatchingConfig,
        reputation_floor: f64,
        directory: Arc<RelayDirectory>,
        ingress_capacity: usize,
        deliver_tx: mpsc::Sender<Vec<u8>>,
    ) -> FogResult<(Self, mpsc::Receiver<EgressJobHandle>)> {
        let delay_gen = PoissonDelayGenerator::new(delay_config)?;
        let (scheduler, egress_rx) = DelayScheduler::spawn(batching.batch_size * 4);
        let pipeline = Self {
            private_scalar,
            replay: Arc::new(ReplayCache::new(replay_window)),
            delay_gen: Arc::new(Mutex::new(delay_gen)),
            scheduler: Arc::new(scheduler),
            lottery: Arc::new(RelayLottery::new(reputation_floor)),
            directory,
            batching,
            stats: Arc::new(PipelineStats::default()),
            ingress_capacity,
            deliver_tx,
        };
        Ok((pipeline, egress_rx))
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Process one ingress frame, already validated by the carrier to be
    /// exactly `PACKET_SIZE` bytes.
    pub async fn handle_ingress(&self, frame: Vec<u8>, lottery_candidates: &[LotteryEntry]) {
        self.stats.ingressed.fetch_add(1, Ordering::Relaxed);

        let packet = match SphinxPacket::from_bytes(&frame) {
            Ok(p) => p,
            Err(_) => {
                self.stats.dropped_corrupt_shape.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let circuit_id = circuit_id_of(&packet);

        let outcome = match SphinxEngine::process_hop(&self.private_scalar, &packet, &self.replay) {
            Ok(outcome) => outcome,
            Err(_) => {
                self.stats.dropped_corrupt_shape.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match outcome {
            ProcessOutcome::BadMac => {
                self.stats.dropped_bad_mac.fetch_add(1, Ordering::Relaxed);
            }
            ProcessOutcome::Replay => {
                self.stats.dropped_replay.fetch_add(1, Ordering::Relaxed);
            }
            ProcessOutcome::Deliver(payload) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                let _ = self.deliver_tx.send(payload).await;
            }
            ProcessOutcome::ForwardTo(next_hop, next_packet) => {
                let destination = if next_hop.0 == LOTTERY_ROUTED.0 {
                    self.lottery
                        .draw(lottery_candidates, circuit_id, 0)
                        .ok()
                        .map(|(addr, _proof)| addr)
                } else {
                    self.directory.resolve(&next_hop).await
                };

                let Some(destination) = destination else {
                    warn!(circuit_id, "forward target could not be resolved; dropping");
                    self.stats.dropped_transmit_error.fetch_add(1, Ordering::Relaxed);
                    return;
                };

                let multiplier = CircuitMultiplier::default();
                let delay = self.delay_gen.lock().await.sample(multiplier);
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                self.scheduler
                    .enqueue(
                        EgressJob {
                            destination,
                            packet_bytes: next_packet.to_bytes(),
                        },
                        Instant::now() + delay,
                        circuit_id,
                    )
                    .await;
            }
        }
    }

    /// Adjust the delay generator's load factor from current ingress queue
    /// depth (spec §4.3: "load factor is set by the pipeline from queue
    /// depth").
    pub async fn report_queue_depth(&self, depth: usize) {
        let load_factor = (depth as f64 / self.ingress_capacity.max(1) as f64).clamp(0.0, 1.0);
        self.delay_gen.lock().await.set_load_factor(load_factor);
    }
}

/// Drains `ingress_rx` (fed by one or more carriers), running each frame
/// through the pipeline and periodically reporting queue depth to the
/// delay generator.
pub async fn run_ingress(
    pipeline: Arc<MixnodePipeline>,
    mut ingress_rx: mpsc::Receiver<(SocketAddr, Vec<u8>)>,
    lottery_candidates: Arc<Mutex<Vec<LotteryEntry>>>,
) {
    loop {
        match ingress_rx.recv().await {
            Some((_peer, frame)) => {
                pipeline.report_queue_depth(ingress_rx.len()).await;
                let candidates = lottery_candidates.lock().await.clone();
                pipeline.handle_ingress(frame, &candidates).await;
            }
            None => return,
        }
    }
}

fn circuit_id_of(packet: &SphinxPacket) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&packet.header.ephemeral_pub[0..8]);
    u64::from_be_bytes(bytes)
}

/// Placeholder item type surfaced to callers that spawn the egress batcher;
/// an alias so `MixnodePipeline::new`'s return type doesn't leak the
/// private `EgressJob`.
pub type EgressJobHandle = EgressJob;

/// Drains `egress_rx`, grouping packets by destination into batches of up
/// to `batching.batch_size` or `batching.batch_timeout_ms`, whichever comes
/// first, then performs one carrier write per destination per batch
/// (spec §4.5). Never delays a packet past its already-computed
/// `release_time` — batching only governs how already-due packets are
/// grouped for the write, not when they become due.
pub async fn run_egress_batcher(
    mut egress_rx: mpsc::Receiver<EgressJobHandle>,
    batching: BatchingConfig,
    stats: Arc<PipelineStats>,
) {
    let timeout = Duration::from_millis(batching.batch_timeout_ms);
    let mut pending: HashMap<SocketAddr, Vec<Vec<u8>>> = HashMap::new();
    let mut total_pending = 0usize;

    loop {
        let deadline = tokio::time::sleep(timeout);
        tokio::select! {
            biased;
            item = egress_rx.recv() => {
                match item {
                    Some(job) => {
                        pending.entry(job.destination).or_default().push(job.packet_bytes);
                        total_pending += 1;
                        if total_pending >= batching.batch_size {
                            flush(&mut pending, &mut total_pending, &stats).await;
                        }
                    }
                    None => {
                        flush(&mut pending, &mut total_pending, &stats).await;
                        return;
                    }
                }
            }
            _ = deadline => {
                if total_pending > 0 {
                    flush(&mut pending, &mut total_pending, &stats).await;
                }
            }
        }
    }
}

async fn flush(
    pending: &mut HashMap<SocketAddr, Vec<Vec<u8>>>,
    total_pending: &mut usize,
    stats: &Arc<PipelineStats>,
) {
    for (destination, frames) in pending.drain() {
        for frame in frames {
            debug_assert_eq!(frame.len(), PACKET_SIZE);
            if let Err(e) = carrier::send_frame(destination, &frame).await {
                debug!(%destination, error = %e, "egress transmit failed");
                stats.dropped_transmit_error.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    *total_pending = 0;
}

#[allow(dead_code)]
fn assert_send<T: Send>() {}

#[cfg(all(test, feature = "vrf"))]
mod tests {
    use super::*;
    use crate::sphinx::crypto;
    use crate::sphinx::header::PAYLOAD_SIZE;
    use std::time::Duration as StdDuration;

    fn delay_config() -> DelayConfig {
        DelayConfig {
            mean_delay: StdDuration::from_millis(10),
            min_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(100),
            jitter_fraction: 0.1,
            cover_mode: crate::delay::cover::CoverTrafficMode::Off,
            cover_rate: 1.0,
        }
    }

    #[tokio::test]
    async fn single_hop_packet_is_delivered_and_counted() {
        let (relay_scalar, relay_point) = crypto::generate_ephemeral();
        let payload = [42u8; PAYLOAD_SIZE];
        let packet = SphinxEngine::wrap(&[relay_point.to_bytes()], &payload).unwrap();

        let (deliver_tx, mut deliver_rx) = mpsc::channel(1);
        let (pipeline, _egress_rx) = MixnodePipeline::new(
            relay_scalar,
            StdDuration::from_secs(3600),
            &delay_config(),
            BatchingConfig {
                batch_size: 128,
                batch_timeout_ms: 10,
            },
            0.0,
            Arc::new(RelayDirectory::new()),
            1024,
            deliver_tx,
        )
        .unwrap();

        pipeline.handle_ingress(packet.to_bytes(), &[]).await;

        let delivered = deliver_rx.recv().await.unwrap();
        assert_eq!(delivered, payload.to_vec());
        assert_eq!(pipeline.stats().delivered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn tampered_packet_is_dropped_and_counted() {
        let (relay_scalar, relay_point) = crypto::generate_ephemeral();
        let payload = [1u8; PAYLOAD_SIZE];
        let mut packet = SphinxEngine::wrap(&[relay_point.to_bytes()], &payload).unwrap();
        packet.header.mac[0] ^= 0xFF;

        let (deliver_tx, _deliver_rx) = mpsc::channel(1);
        let (pipeline, _egress_rx) = MixnodePipeline::new(
            relay_scalar,
            StdDuration::from_secs(3600),
            &delay_config(),
            BatchingConfig {
                batch_size: 128,
                batch_timeout_ms: 10,
            },
            0.0,
            Arc::new(RelayDirectory::new()),
            1024,
            deliver_tx,
        )
        .unwrap();

        pipeline.handle_ingress(packet.to_bytes(), &[]).await;
        assert_eq!(pipeline.stats().dropped_bad_mac.load(Ordering::Relaxed), 1);
    }
}
