//! NSGA-II multi-objective search over job→node assignment vectors
//! (spec §4.6). Falls back to the heuristic in [`crate::placement::fallback`]
//! when no feasible candidate exists within the generation budget.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;
use std::collections::HashMap;

use crate::config::PlacementConfig;
use crate::placement::fallback::place as fallback_place;
use crate::placement::model::{is_feasible, score, Job, Node, Placement, ResourceVector, ScoreVector};

const TOURNAMENT_SIZE: usize = 3;
const CROSSOVER_RATE: f64 = 0.8;
const MUTATION_RATE: f64 = 0.1;

/// A candidate solution: one node index per job, or `None` if the job has
/// no feasible node at all (never assigned, never penalized).
#[derive(Debug, Clone)]
struct Candidate {
    assignment: Vec<Option<usize>>,
    objectives: ScoreVector,
    rank: usize,
    crowding: f64,
}

/// Runs NSGA-II for up to `config.max_generations` generations (or until
/// the best front's hypervolume is stable for `config.convergence_window`
/// generations), returning one [`Placement`] per job that found a feasible
/// node. Degrades to the heuristic fallback if generation zero has no
/// feasible candidate at all.
pub fn search(
    jobs: &[Job],
    nodes: &[Node],
    config: &PlacementConfig,
    price_by_node: &HashMap<Uuid, f64>,
    seed: u64,
) -> Vec<Placement> {
    let feasible_nodes: Vec<Vec<usize>> = jobs
        .iter()
        .map(|job| {
            nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| is_feasible(job, n))
                .map(|(i, _)| i)
                .collect::<Vec<usize>>()
        })
        .collect();

    if feasible_nodes.iter().all(|f| f.is_empty()) {
        return fallback_place(jobs, nodes, config.fallback_strategy, price_by_node);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut population: Vec<Candidate> = (0..config.population)
        .map(|_| random_candidate(&feasible_nodes, &mut rng))
        .collect();
    evaluate(&mut population, jobs, nodes, price_by_node);
    assign_ranks_and_crowding(&mut population);

    let mut best_hypervolume = hypervolume(&population);
    let mut stable_generations = 0;

    for _generation in 0..config.max_generations {
        let mut offspring = Vec::with_capacity(config.population);
        while offspring.len() < config.population {
            let parent_a = tournament_select(&population, &mut rng);
            let parent_b = tournament_select(&population, &mut rng);
            let mut child = if rng.gen::<f64>() < CROSSOVER_RATE {
                crossover(parent_a, parent_b, &mut rng)
            } else {
                parent_a.assignment.clone()
            };
            mutate(&mut child, &feasible_nodes, &mut rng);
            offspring.push(Candidate {
                assignment: child,
                objectives: ScoreVector {
                    latency: 0.0,
                    load_variance: 0.0,
                    neg_trust: 0.0,
                    cost: 0.0,
                    price: 0.0,
                },
                rank: 0,
                crowding: 0.0,
            });
        }
        evaluate(&mut offspring, jobs, nodes, price_by_node);

        let mut combined: Vec<Candidate> = population.into_iter().chain(offspring).collect();
        assign_ranks_and_crowding(&mut combined);
        combined.sort_by(|a, b| {
            a.rank
                .cmp(&b.rank)
                .then(b.crowding.partial_cmp(&a.crowding).unwrap())
        });
        combined.truncate(config.population);
        population = combined;

        let hv = hypervolume(&population);
        if (hv - best_hypervolume).abs() < 1e-6 {
            stable_generations += 1;
        } else {
            stable_generations = 0;
            best_hypervolume = hv;
        }
        if stable_generations >= config.convergence_window {
            break;
        }
    }

    let winner = population
        .iter()
        .filter(|c| c.rank == 0)
        .min_by(|a, b| b.crowding.partial_cmp(&a.crowding).unwrap())
        .or_else(|| population.first())
        .expect("population is never empty");

    resolve_assignment(&winner.assignment, jobs, nodes)
        .iter()
        .enumerate()
        .filter_map(|(job_idx, node_idx)| {
            let node_idx = (*node_idx)?;
            let job = &jobs[job_idx];
            let node = &nodes[node_idx];
            Some(Placement {
                job_id: job.id,
                node_id: node.id,
                score_vector: score(job, node, price_by_node),
            })
        })
        .collect()
}

/// Walks `assignment` in job-index order, tracking each node's remaining
/// capacity as earlier jobs claim it, and drops any job whose chosen node no
/// longer has room — a candidate can name the same node for several jobs
/// without any single job-node pair being individually infeasible, but the
/// committed set still must not oversubscribe a node (spec §8: "no two
/// placements assigned concurrently to node N cause the sum of their
/// resource_vectors to exceed N.capacity_vector").
fn resolve_assignment(
    assignment: &[Option<usize>],
    jobs: &[Job],
    nodes: &[Node],
) -> Vec<Option<usize>> {
    let mut remaining: Vec<ResourceVector> =
        nodes.iter().map(|n| n.available_capacity()).collect();
    assignment
        .iter()
        .enumerate()
        .map(|(job_idx, node_idx)| {
            let node_idx = (*node_idx)?;
            let demand = jobs[job_idx].resource_vector;
            if demand.fits_within(&remaining[node_idx]) {
                remaining[node_idx] = remaining[node_idx].saturating_sub(&demand);
                Some(node_idx)
            } else {
                None
            }
        })
        .collect()
}

fn random_candidate(feasible_nodes: &[Vec<usize>], rng: &mut StdRng) -> Candidate {
    let assignment = feasible_nodes
        .iter()
        .map(|options| {
            if options.is_empty() {
                None
            } else {
                Some(options[rng.gen_range(0..options.len())])
            }
        })
        .collect();
    Candidate {
        assignment,
        objectives: ScoreVector {
            latency: 0.0,
            load_variance: 0.0,
            neg_trust: 0.0,
            cost: 0.0,
            price: 0.0,
        },
        rank: 0,
        crowding: 0.0,
    }
}

fn evaluate(
    population: &mut [Candidate],
    jobs: &[Job],
    nodes: &[Node],
    price_by_node: &HashMap<Uuid, f64>,
) {
    for candidate in population.iter_mut() {
        let mut total = ScoreVector {
            latency: 0.0,
            load_variance: 0.0,
            neg_trust: 0.0,
            cost: 0.0,
            price: 0.0,
        };
        let resolved = resolve_assignment(&candidate.assignment, jobs, nodes);
        for (job_idx, node_idx) in resolved.iter().enumerate() {
            if let Some(node_idx) = node_idx {
                let s = score(&jobs[job_idx], &nodes[*node_idx], price_by_node);
                total.latency += s.latency;
                total.load_variance += s.load_variance;
                total.neg_trust += s.neg_trust;
                total.cost += s.cost;
                total.price += s.price;
            } else {
                // Unassignable job: penalize so candidates that leave more
                // jobs unplaced never dominate ones that place more.
                total.latency += 1e6;
            }
        }
        candidate.objectives = total;
    }
}

fn assign_ranks_and_crowding(population: &mut [Candidate]) {
    let n = population.len();
    let mut dominates_list: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if population[i].objectives.dominates(&population[j].objectives) {
                dominates_list[i].push(j);
            } else if population[j].objectives.dominates(&population[i].objectives) {
                domination_count[i] += 1;
            }
        }
    }

    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| domination_count[i] == 0).collect();
    let mut remaining = domination_count;
    let mut rank = 0;
    while !current.is_empty() {
        for &i in &current {
            population[i].rank = rank;
        }
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dominates_list[i] {
                remaining[j] -= 1;
                if remaining[j] == 0 {
                    next.push(j);
                }
            }
        }
        fronts.push(std::mem::take(&mut current));
        current = next;
        rank += 1;
    }

    for front in &fronts {
        assign_crowding_distance(population, front);
    }
}

fn assign_crowding_distance(population: &mut [Candidate], front: &[usize]) {
    for &i in front {
        population[i].crowding = 0.0;
    }
    if front.len() <= 2 {
        for &i in front {
            population[i].crowding = f64::INFINITY;
        }
        return;
    }

    for objective in 0..5 {
        let mut sorted = front.to_vec();
        sorted.sort_by(|&a, &b| {
            objective_value(&population[a].objectives, objective)
                .partial_cmp(&objective_value(&population[b].objectives, objective))
                .unwrap()
        });
        population[sorted[0]].crowding = f64::INFINITY;
        population[*sorted.last().unwrap()].crowding = f64::INFINITY;

        let min = objective_value(&population[sorted[0]].objectives, objective);
        let max = objective_value(&population[*sorted.last().unwrap()].objectives, objective);
        let span = (max - min).max(1e-9);

        for window in sorted.windows(3) {
            let (prev, mid, next) = (window[0], window[1], window[2]);
            if population[mid].crowding.is_finite() {
                let prev_v = objective_value(&population[prev].objectives, objective);
                let next_v = objective_value(&population[next].objectives, objective);
                population[mid].crowding += (next_v - prev_v).abs() / span;
            }
        }
    }
}

fn objective_value(v: &ScoreVector, index: usize) -> f64 {
    v.as_array()[index]
}

fn tournament_select<'a>(population: &'a [Candidate], rng: &mut StdRng) -> &'a Candidate {
    let mut best: Option<&Candidate> = None;
    for _ in 0..TOURNAMENT_SIZE {
        let candidate = &population[rng.gen_range(0..population.len())];
        best = Some(match best {
            None => candidate,
            Some(current) => {
                if candidate.rank < current.rank
                    || (candidate.rank == current.rank && candidate.crowding > current.crowding)
                {
                    candidate
                } else {
                    current
                }
            }
        });
    }
    best.expect("tournament size is nonzero")
}

fn crossover(a: &Candidate, b: &Candidate, rng: &mut StdRng) -> Vec<Option<usize>> {
    a.assignment
        .iter()
        .zip(b.assignment.iter())
        .map(|(gene_a, gene_b)| if rng.gen_bool(0.5) { *gene_a } else { *gene_b })
        .collect()
}

fn mutate(assignment: &mut [Option<usize>], feasible_nodes: &[Vec<usize>], rng: &mut StdRng) {
    for (job_idx, gene) in assignment.iter_mut().enumerate() {
        if rng.gen::<f64>() < MUTATION_RATE {
            let options = &feasible_nodes[job_idx];
            *gene = if options.is_empty() {
                None
            } else {
                Some(options[rng.gen_range(0..options.len())])
            };
        }
    }
}

/// Monte Carlo hypervolume estimate of the rank-0 front against a
/// reference point one unit beyond the front's worst value per objective.
/// An exact hypervolume in five dimensions is expensive enough that a
/// seeded approximation is the practical choice for a convergence signal.
fn hypervolume(population: &[Candidate]) -> f64 {
    let front: Vec<&ScoreVector> = population
        .iter()
        .filter(|c| c.rank == 0)
        .map(|c| &c.objectives)
        .collect();
    if front.is_empty() {
        return 0.0;
    }

    let mut reference = [f64::MIN; 5];
    for point in &front {
        let arr = point.as_array();
        for i in 0..5 {
            reference[i] = reference[i].max(arr[i]);
        }
    }
    for r in reference.iter_mut() {
        *r += 1.0;
    }

    let mut rng = StdRng::seed_from_u64(0xF0C5_CAFE);
    let samples = 512;
    let mut dominated = 0;
    let mut mins = [f64::MAX; 5];
    for point in &front {
        let arr = point.as_array();
        for i in 0..5 {
            mins[i] = mins[i].min(arr[i]);
        }
    }

    for _ in 0..samples {
        let sample: [f64; 5] = std::array::from_fn(|i| rng.gen_range(mins[i]..=reference[i]));
        if front.iter().any(|point| {
            let arr = point.as_array();
            (0..5).all(|i| arr[i] <= sample[i])
        }) {
            dominated += 1;
        }
    }

    let volume: f64 = (0..5).map(|i| reference[i] - mins[i]).product();
    volume * (dominated as f64 / samples as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::model::{HealthStatus, PriorityClass, ResourceVector};
    use chrono::Utc;

    fn node(id_seed: u8, cpu_cap: f64, trust: f64) -> Node {
        Node {
            id: Uuid::from_bytes([id_seed; 16]),
            address: "127.0.0.1:8000".parse().unwrap(),
            capacity_vector: ResourceVector {
                cpu: cpu_cap,
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

    fn job(id_seed: u8, cpu: f64) -> Job {
        Job {
            id: Uuid::from_bytes([id_seed; 16]),
            resource_vector: ResourceVector {
                cpu,
                memory: 1.0,
                gpu: 0.0,
                storage: 1.0,
            },
            deadline: Utc::now(),
            priority_class: PriorityClass::A,
            trust_floor: 0.0,
            marketplace_bid_type: "spot".into(),
            submitted_at: Utc::now(),
            required_region: None,
        }
    }

    fn config() -> PlacementConfig {
        PlacementConfig {
            population: 20,
            max_generations: 15,
            convergence_window: 5,
            fallback_strategy: crate::placement::fallback::FallbackStrategy::LoadBalance,
        }
    }

    #[test]
    fn places_every_feasible_job() {
        let jobs = vec![job(1, 1.0), job(2, 2.0)];
        let nodes = vec![node(1, 8.0, 0.9), node(2, 8.0, 0.9)];
        let placements = search(&jobs, &nodes, &config(), &HashMap::new(), 1);
        assert_eq!(placements.len(), 2);
    }

    #[test]
    fn falls_back_when_no_node_is_feasible() {
        let jobs = vec![job(1, 1.0)];
        let nodes = vec![node(1, 8.0, 0.0)];
        let mut j = jobs;
        j[0].trust_floor = 0.99;
        let placements = search(&j, &nodes, &config(), &HashMap::new(), 1);
        assert!(placements.is_empty());
    }

    #[test]
    fn never_oversubscribes_a_single_node_across_jobs() {
        let jobs = vec![job(1, 8.0), job(2, 8.0), job(3, 8.0)];
        let nodes = vec![node(1, 16.0, 0.9)];
        let placements = search(&jobs, &nodes, &config(), &HashMap::new(), 7);
        assert_eq!(placements.len(), 2);
        let total_cpu: f64 = placements
            .iter()
            .map(|p| jobs.iter().find(|j| j.id == p.job_id).unwrap().resource_vector.cpu)
            .sum();
        assert!(total_cpu <= 16.0);
    }

    #[test]
    fn same_seed_is_deterministic() {
        let jobs = vec![job(1, 1.0), job(2, 2.0), job(3, 1.5)];
        let nodes = vec![node(1, 8.0, 0.9), node(2, 8.0, 0.5)];
        let first = search(&jobs, &nodes, &config(), &HashMap::new(), 42);
        let second = search(&jobs, &nodes, &config(), &HashMap::new(), 42);
        let first_nodes: Vec<Uuid> = first.iter().map(|p| p.node_id).collect();
        let second_nodes: Vec<Uuid> = second.iter().map(|p| p.node_id).collect();
        assert_eq!(first_nodes, second_nodes);
    }
}
