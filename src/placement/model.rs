//! Data model shared by the NSGA-II search and its heuristic fallback
//! (spec §3 / §4.6).

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resource demand or capacity along four axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: f64,
    pub memory: f64,
    pub gpu: f64,
    pub storage: f64,
}

impl ResourceVector {
    /// `self` fits within `capacity` along every axis.
    pub fn fits_within(&self, capacity: &ResourceVector) -> bool {
        self.cpu <= capacity.cpu
            && self.memory <= capacity.memory
            && self.gpu <= capacity.gpu
            && self.storage <= capacity.storage
    }

    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: (self.cpu - other.cpu).max(0.0),
            memory: (self.memory - other.memory).max(0.0),
            gpu: (self.gpu - other.gpu).max(0.0),
            storage: (self.storage - other.storage).max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityClass {
    S,
    A,
    B,
}

/// A unit of work awaiting placement (spec §3 `Job`). Immutable after
/// submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub resource_vector: ResourceVector,
    pub deadline: DateTime<Utc>,
    pub priority_class: PriorityClass,
    pub trust_floor: f64,
    pub marketplace_bid_type: String,
    pub submitted_at: DateTime<Utc>,
    /// Region a `Proximity`-routed job must match; `None` if indifferent.
    pub required_region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermalState {
    Nominal,
    Elevated,
    Critical,
}

/// A placement target (spec §3 `Node`), mutated by the coordinator on
/// heartbeat and task assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub address: SocketAddr,
    pub capacity_vector: ResourceVector,
    pub utilization_vector: ResourceVector,
    pub queued_tasks: Vec<Uuid>,
    pub health_status: HealthStatus,
    pub battery_level: Option<f64>,
    pub is_charging: bool,
    pub thermal_state: Option<ThermalState>,
    pub region: Option<String>,
    pub trust_score: f64,
    pub supports_onion: bool,
}

impl Node {
    pub fn available_capacity(&self) -> ResourceVector {
        self.capacity_vector.saturating_sub(&self.utilization_vector)
    }

    /// Eligibility policy for device-class nodes (spec §4.7).
    pub fn is_eligible(&self) -> bool {
        let battery_ok = self.battery_level.map_or(true, |b| b >= 0.5) || self.is_charging;
        let thermal_ok = self.thermal_state != Some(ThermalState::Critical);
        battery_ok && thermal_ok
    }
}

/// The five minimization objectives (spec §3 `Placement.score_vector`):
/// latency, load-variance contribution, −trust, operational cost,
/// marketplace price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector {
    pub latency: f64,
    pub load_variance: f64,
    pub neg_trust: f64,
    pub cost: f64,
    pub price: f64,
}

impl ScoreVector {
    pub fn as_array(&self) -> [f64; 5] {
        [self.latency, self.load_variance, self.neg_trust, self.cost, self.price]
    }

    /// `self` Pareto-dominates `other`: no worse on every objective, and
    /// strictly better on at least one.
    pub fn dominates(&self, other: &ScoreVector) -> bool {
        let mine = self.as_array();
        let theirs = other.as_array();
        mine.iter().zip(theirs.iter()).all(|(a, b)| a <= b)
            && mine.iter().zip(theirs.iter()).any(|(a, b)| a < b)
    }
}

/// A placement decision (spec §3 `Placement`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub job_id: Uuid,
    pub node_id: Uuid,
    pub score_vector: ScoreVector,
}

/// Whether a job can run on a node at all, independent of objective scoring
/// (spec §4.6: "reject infeasible assignments").
pub fn is_feasible(job: &Job, node: &Node) -> bool {
    if !job.resource_vector.fits_within(&node.available_capacity()) {
        return false;
    }
    if node.trust_score < job.trust_floor {
        return false;
    }
    if let Some(region) = &job.required_region {
        if node.region.as_deref() != Some(region.as_str()) {
            return false;
        }
    }
    true
}

/// Compute the five-objective score for assigning `job` to `node`.
pub fn score(job: &Job, node: &Node, price_by_node: &HashMap<Uuid, f64>) -> ScoreVector {
    let utilization_after = node.utilization_vector.cpu + job.resource_vector.cpu;
    let capacity = node.capacity_vector.cpu.max(1e-9);
    let load_variance = (utilization_after / capacity).powi(2);

    let latency = node.queued_tasks.len() as f64 + 1.0;
    let cost = job.resource_vector.cpu + job.resource_vector.memory / 4.0 + job.resource_vector.gpu * 2.0;
    let price = price_by_node.get(&node.id).copied().unwrap_or(1.0);

    ScoreVector {
        latency,
        load_variance,
        neg_trust: -node.trust_score,
        cost,
        price,
    }
}
