//! Heuristic fallback used when NSGA-II finds no feasible candidate within
//! budget (spec §4.6): filter by feasibility, then rank by one objective
//! chosen by policy. Bounded-time by construction — no search, just a sort.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::placement::model::{is_feasible, score, Job, Node, Placement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackStrategy {
    LatencyFirst,
    LoadBalance,
    TrustFirst,
    CostOptimize,
    RoundRobin,
}

/// Place every job in `jobs` using the heuristic named by `strategy`,
/// against the feasible subset of `nodes`. Jobs with no feasible node are
/// omitted (the caller decides whether that's a hard failure).
pub fn place(
    jobs: &[Job],
    nodes: &[Node],
    strategy: FallbackStrategy,
    price_by_node: &HashMap<Uuid, f64>,
) -> Vec<Placement> {
    let mut round_robin_cursor = 0usize;
    let mut placements = Vec::with_capacity(jobs.len());

    for job in jobs {
        let feasible: Vec<&Node> = nodes.iter().filter(|n| is_feasible(job, n)).collect();
        if feasible.is_empty() {
            continue;
        }

        let chosen = match strategy {
            FallbackStrategy::LatencyFirst => feasible
                .iter()
                .min_by(|a, b| a.queued_tasks.len().cmp(&b.queued_tasks.len()))
                .unwrap(),
            FallbackStrategy::LoadBalance => feasible
                .iter()
                .min_by(|a, b| {
                    let ua = a.utilization_vector.cpu / a.capacity_vector.cpu.max(1e-9);
                    let ub = b.utilization_vector.cpu / b.capacity_vector.cpu.max(1e-9);
                    ua.partial_cmp(&ub).unwrap()
                })
                .unwrap(),
            FallbackStrategy::TrustFirst => feasible
                .iter()
                .max_by(|a, b| a.trust_score.partial_cmp(&b.trust_score).unwrap())
                .unwrap(),
            FallbackStrategy::CostOptimize => feasible
                .iter()
                .min_by(|a, b| {
                    let ca = score(job, a, price_by_node).cost;
                    let cb = score(job, b, price_by_node).cost;
                    ca.partial_cmp(&cb).unwrap()
                })
                .unwrap(),
            FallbackStrategy::RoundRobin => {
                let picked = &feasible[round_robin_cursor % feasible.len()];
                round_robin_cursor += 1;
                picked
            }
        };

        placements.push(Placement {
            job_id: job.id,
            node_id: chosen.id,
            score_vector: score(job, chosen, price_by_node),
        });
    }

    placements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::model::{HealthStatus, PriorityClass, ResourceVector};
    use chrono::Utc;

    fn node(cpu_used: f64, trust: f64) -> Node {
        Node {
            id: Uuid::new_v4(),
            address: "127.0.0.1:8000".parse().unwrap(),
            capacity_vector: ResourceVector {
                cpu: 8.0,
                memory: 16.0,
                gpu: 1.0,
                storage: 100.0,
            },
            utilization_vector: ResourceVector {
                cpu: cpu_used,
                ..Default::default()
            },
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
    fn load_balance_prefers_least_utilized_node() {
        let busy = node(7.0, 0.9);
        let idle = node(0.0, 0.9);
        let nodes = vec![busy.clone(), idle.clone()];
        let placements = place(&[job()], &nodes, FallbackStrategy::LoadBalance, &HashMap::new());
        assert_eq!(placements[0].node_id, idle.id);
    }

    #[test]
    fn trust_first_prefers_highest_trust_node() {
        let low = node(0.0, 0.2);
        let high = node(0.0, 0.95);
        let nodes = vec![low.clone(), high.clone()];
        let placements = place(&[job()], &nodes, FallbackStrategy::TrustFirst, &HashMap::new());
        assert_eq!(placements[0].node_id, high.id);
    }

    #[test]
    fn jobs_with_no_feasible_node_are_skipped() {
        let mut j = job();
        j.trust_floor = 0.99;
        let nodes = vec![node(0.0, 0.1)];
        let placements = place(&[j], &nodes, FallbackStrategy::LoadBalance, &HashMap::new());
        assert!(placements.is_empty());
    }

    #[test]
    fn round_robin_cycles_through_feasible_nodes() {
        let a = node(0.0, 0.9);
        let b = node(0.0, 0.9);
        let nodes = vec![a.clone(), b.clone()];
        let jobs = vec![job(), job(), job()];
        let placements = place(&jobs, &nodes, FallbackStrategy::RoundRobin, &HashMap::new());
        assert_eq!(placements[0].node_id, a.id);
        assert_eq!(placements[1].node_id, b.id);
        assert_eq!(placements[2].node_id, a.id);
    }
}
