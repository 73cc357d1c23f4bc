//! In-process Prometheus registry, no scrape endpoint (out of scope per
//! spec §1 — observability layers beyond structured logging are not a
//! feature this crate ships, but the registry itself is ambient plumbing a
//! real deployment would wire into whatever exporter it already runs).

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

#[derive(Clone)]
pub struct FogMetrics {
    pub packets_ingressed: IntCounter,
    pub packets_delivered: IntCounter,
    pub packets_forwarded: IntCounter,
    pub packets_dropped_bad_mac: IntCounter,
    pub packets_dropped_replay: IntCounter,
    pub ingress_queue_refusals: IntCounter,

    pub scheduled_release_delay: Histogram,
    pub egress_batch_size: Histogram,

    pub nodes_registered: IntGauge,
    pub nodes_unhealthy: IntGauge,
    pub placements_committed: IntCounter,
    pub placements_infeasible: IntCounter,

    pub services_running: IntGauge,
    pub services_failed: IntGauge,
    pub service_restarts: IntCounter,

    registry: Registry,
}

impl FogMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let packets_ingressed = IntCounter::with_opts(Opts::new(
            "fogmix_packets_ingressed_total",
            "Total Sphinx frames accepted by the carrier",
        ))?;
        let packets_delivered = IntCounter::with_opts(Opts::new(
            "fogmix_packets_delivered_total",
            "Total packets reaching the final hop",
        ))?;
        let packets_forwarded = IntCounter::with_opts(Opts::new(
            "fogmix_packets_forwarded_total",
            "Total packets scheduled for the next hop",
        ))?;
        let packets_dropped_bad_mac = IntCounter::with_opts(Opts::new(
            "fogmix_packets_dropped_bad_mac_total",
            "Total packets dropped for MAC verification failure",
        ))?;
        let packets_dropped_replay = IntCounter::with_opts(Opts::new(
            "fogmix_packets_dropped_replay_total",
            "Total packets dropped as replays",
        ))?;
        let ingress_queue_refusals = IntCounter::with_opts(Opts::new(
            "fogmix_ingress_queue_refusals_total",
            "Total frames dropped due to a full ingress queue",
        ))?;

        let scheduled_release_delay = Histogram::with_opts(
            HistogramOpts::new(
                "fogmix_scheduled_release_delay_seconds",
                "Delay between enqueue and scheduled release",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
        )?;
        let egress_batch_size = Histogram::with_opts(
            HistogramOpts::new("fogmix_egress_batch_size", "Packets per egress write batch")
                .buckets(vec![1.0, 4.0, 16.0, 32.0, 64.0, 128.0, 256.0]),
        )?;

        let nodes_registered = IntGauge::with_opts(Opts::new(
            "fogmix_nodes_registered",
            "Nodes currently in the fog coordinator's registry",
        ))?;
        let nodes_unhealthy = IntGauge::with_opts(Opts::new(
            "fogmix_nodes_unhealthy",
            "Nodes currently marked Unhealthy",
        ))?;
        let placements_committed = IntCounter::with_opts(Opts::new(
            "fogmix_placements_committed_total",
            "Total jobs successfully placed",
        ))?;
        let placements_infeasible = IntCounter::with_opts(Opts::new(
            "fogmix_placements_infeasible_total",
            "Total jobs with no feasible node this round",
        ))?;

        let services_running = IntGauge::with_opts(Opts::new(
            "fogmix_services_running",
            "Orchestrator services currently Running",
        ))?;
        let services_failed = IntGauge::with_opts(Opts::new(
            "fogmix_services_failed",
            "Orchestrator services currently Failed",
        ))?;
        let service_restarts = IntCounter::with_opts(Opts::new(
            "fogmix_service_restarts_total",
            "Total auto-restart attempts across all services",
        ))?;

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(packets_ingressed.clone()),
            Box::new(packets_delivered.clone()),
            Box::new(packets_forwarded.clone()),
            Box::new(packets_dropped_bad_mac.clone()),
            Box::new(packets_dropped_replay.clone()),
            Box::new(ingress_queue_refusals.clone()),
            Box::new(scheduled_release_delay.clone()),
            Box::new(egress_batch_size.clone()),
            Box::new(nodes_registered.clone()),
            Box::new(nodes_unhealthy.clone()),
            Box::new(placements_committed.clone()),
            Box::new(placements_infeasible.clone()),
            Box::new(services_running.clone()),
            Box::new(services_failed.clone()),
            Box::new(service_restarts.clone()),
        ];
        for metric in collectors {
            registry.register(metric)?;
        }

        Ok(Self {
            packets_ingressed,
            packets_delivered,
            packets_forwarded,
            packets_dropped_bad_mac,
            packets_dropped_replay,
            ingress_queue_refusals,
            scheduled_release_delay,
            egress_batch_size,
            nodes_registered,
            nodes_unhealthy,
            placements_committed,
            placements_infeasible,
            services_running,
            services_failed,
            service_restarts,
            registry,
        })
    }

    /// Render the registry in Prometheus text exposition format, for a
    /// caller that wires its own exporter (deliberately not bundled here).
    pub fn gather_text(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).expect("encoding registered metrics cannot fail");
        String::from_utf8(buffer).expect("prometheus text encoding is always valid utf-8")
    }
}

lazy_static! {
    pub static ref METRICS: FogMetrics =
        FogMetrics::new().expect("static metric registration cannot fail at startup");
}
