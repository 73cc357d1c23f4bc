//! Fog Coordinator (spec §4.7): node registry, heartbeat reaper, batch
//! placement dispatch, task reclaim on node failure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::placement::fallback::FallbackStrategy;
use crate::placement::model::{HealthStatus, Job, Node, Placement};
use crate::placement::nsga2;
use crate::{FogError, FogResult};

/// Routing strategy selecting how `AssignTask` picks among feasible nodes
/// when a job doesn't go through the full NSGA-II search (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingStrategy {
    RoundRobin,
    LeastLoaded,
    Affinity,
    Proximity,
    PrivacyAware,
    Custom,
}

/// One heartbeat report from a node.
#[derive(Debug, Clone)]
pub struct HeartbeatReport {
    pub utilization: crate::placement::model::ResourceVector,
    pub battery_level: Option<f64>,
    pub thermal_state: Option<crate::placement::model::ThermalState>,
}

struct NodeRecord {
    node: Node,
    last_heartbeat: DateTime<Utc>,
    missed_beats: u32,
}

/// Node registry, pending-task queue, and the two background loops (heartbeat
/// reaper, placement dispatcher) that keep the fog's view of the world
/// current.
pub struct FogCoordinator {
    config: CoordinatorConfig,
    nodes: Arc<DashMap<Uuid, NodeRecord>>,
    pending: Arc<Mutex<VecDeque<Job>>>,
    placements: Arc<RwLock<Vec<Placement>>>,
    round_robin_cursor: AtomicU64,
    placement_seed: AtomicU64,
}

impl FogCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            nodes: Arc::new(DashMap::new()),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            placements: Arc::new(RwLock::new(Vec::new())),
            round_robin_cursor: AtomicU64::new(0),
            placement_seed: AtomicU64::new(1),
        }
    }

    /// `RegisterNode` — inserts into the registry with Healthy status.
    pub fn register_node(&self, mut node: Node) {
        node.health_status = HealthStatus::Healthy;
        self.nodes.insert(
            node.id,
            NodeRecord {
                node,
                last_heartbeat: Utc::now(),
                missed_beats: 0,
            },
        );
    }

    pub fn node(&self, node_id: &Uuid) -> Option<Node> {
        self.nodes.get(node_id).map(|r| r.node.clone())
    }

    /// `Heartbeat` — refreshes liveness and observed state. Eligibility
    /// violations (battery, thermal) drain the node from future placements
    /// immediately but never preempt tasks already running on it.
    pub fn heartbeat(&self, node_id: Uuid, report: HeartbeatReport) -> FogResult<()> {
        let mut entry = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| FogError::Dependency(format!("unknown node {node_id}")))?;
        entry.node.utilization_vector = report.utilization;
        if let Some(battery) = report.battery_level {
            entry.node.battery_level = Some(battery);
        }
        if let Some(thermal) = report.thermal_state {
            entry.node.thermal_state = Some(thermal);
        }
        entry.last_heartbeat = Utc::now();
        entry.missed_beats = 0;
        if entry.node.health_status != HealthStatus::Healthy {
            entry.node.health_status = HealthStatus::Healthy;
            info!(%node_id, "node recovered to Healthy on heartbeat");
        }
        Ok(())
    }

    /// `SubmitTask` — enqueue into pending. Priority class S dispatches
    /// immediately rather than waiting for the batch cadence.
    pub async fn submit_task(self: &Arc<Self>, job: Job) {
        let immediate = job.priority_class == crate::placement::model::PriorityClass::S;
        self.pending.lock().await.push_back(job);
        if immediate {
            self.dispatch_once().await;
        }
    }

    /// `AssignTask` — atomic move from pending to the chosen node's
    /// queued_tasks, updating its projected utilization.
    fn assign_task(&self, job: &Job, placement: &Placement) {
        if let Some(mut record) = self.nodes.get_mut(&placement.node_id) {
            record.node.queued_tasks.push(job.id);
            record.node.utilization_vector.cpu += job.resource_vector.cpu;
            record.node.utilization_vector.memory += job.resource_vector.memory;
            record.node.utilization_vector.gpu += job.resource_vector.gpu;
            record.node.utilization_vector.storage += job.resource_vector.storage;
        }
    }

    /// Runs the NSGA-II placement engine over all pending jobs against the
    /// current node snapshot, assigns every placement found, and records it.
    async fn dispatch_once(self: &Arc<Self>) {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return;
        }
        let jobs: Vec<Job> = pending.drain(..).collect();
        drop(pending);

        let nodes: Vec<Node> = self.nodes.iter().map(|r| r.node.clone()).collect();
        let placement_config = crate::config::PlacementConfig {
            fallback_strategy: FallbackStrategy::LoadBalance,
            ..Default::default()
        };
        let seed = self.placement_seed.fetch_add(1, Ordering::Relaxed);
        let placements = nsga2::search(
            &jobs,
            &nodes,
            &placement_config,
            &std::collections::HashMap::new(),
            seed,
        );

        let placed_jobs: std::collections::HashSet<Uuid> =
            placements.iter().map(|p| p.job_id).collect();
        for placement in &placements {
            if let Some(job) = jobs.iter().find(|j| j.id == placement.job_id) {
                self.assign_task(job, placement);
            }
        }

        let unplaced: Vec<Job> = jobs
            .into_iter()
            .filter(|j| !placed_jobs.contains(&j.id))
            .collect();
        if !unplaced.is_empty() {
            warn!(count = unplaced.len(), "jobs had no feasible node this round, re-queuing");
            self.pending.lock().await.extend(unplaced);
        }

        self.placements.write().await.extend(placements);
    }

    /// `OnNodeUnhealthy` — reclaims queued (not-yet-started) tasks and
    /// resubmits them. Running tasks are best-effort; no rollback here.
    pub async fn on_node_unhealthy(self: &Arc<Self>, node_id: Uuid, reclaimed_jobs: Vec<Job>) {
        if let Some(mut record) = self.nodes.get_mut(&node_id) {
            record.node.health_status = HealthStatus::Unhealthy;
            record.node.queued_tasks.clear();
        }
        warn!(%node_id, reclaimed = reclaimed_jobs.len(), "node unhealthy, reclaiming queued tasks");
        let mut pending = self.pending.lock().await;
        for job in reclaimed_jobs {
            pending.push_back(job);
        }
    }

    /// Pick one feasible node per `strategy`, outside the full NSGA-II path
    /// (used by routing-strategy-driven assignment rather than batch
    /// placement, spec §4.7's routing-strategy list).
    pub fn route(&self, job: &Job, strategy: RoutingStrategy) -> Option<Uuid> {
        let candidates: Vec<_> = self
            .nodes
            .iter()
            .filter(|r| r.node.is_eligible() && crate::placement::model::is_feasible(job, &r.node))
            .filter(|r| match strategy {
                RoutingStrategy::PrivacyAware => r.node.supports_onion,
                RoutingStrategy::Proximity => {
                    job.required_region.is_none()
                        || r.node.region == job.required_region
                }
                _ => true,
            })
            .map(|r| r.node.clone())
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let chosen = match strategy {
            RoutingStrategy::LeastLoaded => candidates.iter().min_by(|a, b| {
                let ua = a.utilization_vector.cpu / a.capacity_vector.cpu.max(1e-9);
                let ub = b.utilization_vector.cpu / b.capacity_vector.cpu.max(1e-9);
                ua.partial_cmp(&ub).unwrap()
            }),
            RoutingStrategy::Affinity => candidates.first(),
            _ => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) as usize
                    % candidates.len();
                candidates.get(idx)
            }
        };

        chosen.map(|n| n.id)
    }

    /// One sweep of the heartbeat reaper: any node silent beyond
    /// `heartbeat_timeout` escalates Healthy→Degraded→Unhealthy, one step per
    /// missed window (spec §4.7: "3 missed 60s beats" before Unhealthy).
    async fn reap_heartbeats(self: &Arc<Self>) {
        let now = Utc::now();
        let mut newly_unhealthy = Vec::new();
        for mut entry in self.nodes.iter_mut() {
            let elapsed = now.signed_duration_since(entry.last_heartbeat);
            let elapsed_std = elapsed.to_std().unwrap_or_default();
            if elapsed_std <= self.config.heartbeat_interval {
                continue;
            }
            entry.missed_beats += 1;
            entry.node.health_status = if elapsed_std >= self.config.heartbeat_timeout {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Degraded
            };
            if entry.node.health_status == HealthStatus::Unhealthy {
                newly_unhealthy.push(entry.node.id);
            }
        }
        for node_id in newly_unhealthy {
            self.on_node_unhealthy(node_id, Vec::new()).await;
        }
    }

    /// Spawns the heartbeat reaper and placement dispatcher as long-running
    /// tasks (spec §5: "one heartbeat reaper, one placement dispatcher").
    pub fn spawn(self: &Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let reaper_self = Arc::clone(self);
        let reaper = tokio::spawn(async move {
            let mut ticker = interval(reaper_self.config.heartbeat_interval);
            loop {
                ticker.tick().await;
                reaper_self.reap_heartbeats().await;
            }
        });

        let dispatcher_self = Arc::clone(self);
        let dispatcher = tokio::spawn(async move {
            let mut ticker = interval(dispatcher_self.config.dispatch_interval);
            loop {
                ticker.tick().await;
                dispatcher_self.dispatch_once().await;
            }
        });

        (reaper, dispatcher)
    }

    pub async fn placements(&self) -> Vec<Placement> {
        self.placements.read().await.clone()
    }
}

/// Channel-driven front for `FogCoordinator`, matching spec §5's
/// "many concurrent `SubmitTask`" requirement without requiring every
/// caller to hold a reference to the coordinator directly.
pub enum CoordinatorCommand {
    Submit(Job),
    Heartbeat(Uuid, HeartbeatReport),
}

pub async fn run_command_loop(
    coordinator: Arc<FogCoordinator>,
    mut commands: mpsc::Receiver<CoordinatorCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            CoordinatorCommand::Submit(job) => coordinator.submit_task(job).await,
            CoordinatorCommand::Heartbeat(node_id, report) => {
                if let Err(e) = coordinator.heartbeat(node_id, report) {
                    warn!(error = %e, "heartbeat for unknown node");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::model::{PriorityClass, ResourceVector};

    fn node(trust: f64) -> Node {
        Node {
            id: Uuid::new_v4(),
            address: "127.0.0.1:9000".parse().unwrap(),
            capacity_vector: ResourceVector {
                cpu: 8.0,
                memory: 16.0,
                gpu: 1.0,
                storage: 100.0,
            },
            utilization_vector: ResourceVector::default(),
            queued_tasks: vec![],
            health_status: HealthStatus::Healthy,
            battery_level: None,
            is_charging: false,
            thermal_state: None,
            region: None,
            trust_score: trust,
            supports_onion: false,
        }
    }

    fn job() -> Job {
        Job {
            id: Uuid::new_v4(),
            resource_vector: ResourceVector {
                cpu: 1.0,
                memory: 1.0,
                gpu: 0.0,
                storage: 1.0,
            },
            deadline: Utc::now(),
            priority_class: PriorityClass::B,
            trust_floor: 0.0,
            marketplace_bid_type: "spot".into(),
            submitted_at: Utc::now(),
            required_region: None,
        }
    }

    #[test]
    fn register_node_starts_healthy() {
        let coordinator = FogCoordinator::new(CoordinatorConfig::default());
        let n = node(0.9);
        let id = n.id;
        coordinator.register_node(n);
        assert_eq!(coordinator.node(&id).unwrap().health_status, HealthStatus::Healthy);
    }

    #[test]
    fn heartbeat_updates_utilization_and_clears_missed_beats() {
        let coordinator = FogCoordinator::new(CoordinatorConfig::default());
        let n = node(0.9);
        let id = n.id;
        coordinator.register_node(n);
        let report = HeartbeatReport {
            utilization: ResourceVector {
                cpu: 2.0,
                ..Default::default()
            },
            battery_level: None,
            thermal_state: None,
        };
        coordinator.heartbeat(id, report).unwrap();
        assert_eq!(coordinator.node(&id).unwrap().utilization_vector.cpu, 2.0);
    }

    #[tokio::test]
    async fn reap_heartbeats_escalates_to_unhealthy_only_past_heartbeat_timeout() {
        let coordinator = Arc::new(FogCoordinator::new(CoordinatorConfig::default()));
        let n = node(0.9);
        let id = n.id;
        coordinator.register_node(n);

        // Silent for longer than heartbeat_interval but short of
        // heartbeat_timeout: Degraded, not Unhealthy.
        coordinator.nodes.get_mut(&id).unwrap().last_heartbeat =
            Utc::now() - chrono::Duration::seconds(90);
        coordinator.reap_heartbeats().await;
        assert_eq!(coordinator.node(&id).unwrap().health_status, HealthStatus::Degraded);

        // Silent past heartbeat_timeout: Unhealthy.
        coordinator.nodes.get_mut(&id).unwrap().last_heartbeat =
            Utc::now() - chrono::Duration::seconds(200);
        coordinator.reap_heartbeats().await;
        assert_eq!(coordinator.node(&id).unwrap().health_status, HealthStatus::Unhealthy);
    }

    #[test]
    fn heartbeat_for_unknown_node_is_a_dependency_error() {
        let coordinator = FogCoordinator::new(CoordinatorConfig::default());
        let report = HeartbeatReport {
            utilization: ResourceVector::default(),
            battery_level: None,
            thermal_state: None,
        };
        assert!(coordinator.heartbeat(Uuid::new_v4(), report).is_err());
    }

    #[test]
    fn privacy_aware_routing_requires_onion_support() {
        let coordinator = FogCoordinator::new(CoordinatorConfig::default());
        let mut plain = node(0.9);
        plain.supports_onion = false;
        let mut onion = node(0.9);
        onion.supports_onion = true;
        let onion_id = onion.id;
        coordinator.register_node(plain);
        coordinator.register_node(onion);

        let chosen = coordinator.route(&job(), RoutingStrategy::PrivacyAware);
        assert_eq!(chosen, Some(onion_id));
    }

    #[tokio::test]
    async fn on_node_unhealthy_requeues_reclaimed_jobs() {
        let coordinator = Arc::new(FogCoordinator::new(CoordinatorConfig::default()));
        let n = node(0.9);
        let id = n.id;
        coordinator.register_node(n);
        coordinator.on_node_unhealthy(id, vec![job()]).await;
        assert_eq!(coordinator.node(&id).unwrap().health_status, HealthStatus::Unhealthy);
        assert_eq!(coordinator.pending.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn submit_task_dispatches_priority_s_immediately() {
        let coordinator = Arc::new(FogCoordinator::new(CoordinatorConfig::default()));
        coordinator.register_node(node(0.9));
        let mut urgent = job();
        urgent.priority_class = PriorityClass::S;
        coordinator.submit_task(urgent).await;
        assert!(coordinator.pending.lock().await.is_empty());
        assert_eq!(coordinator.placements().await.len(), 1);
    }
}
