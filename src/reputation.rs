//! Node reputation: point-based scoring, decay, and cost-of-forgery, backed
//! by an opaque JSON snapshot for persistence (spec §3 / §4.4 / §6).

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{FogError, FogResult};

const MIN_POINTS: f64 = 0.0;
const MAX_POINTS: f64 = 200.0;
const BASE_POINTS: f64 = 100.0;
const DECAY_PER_DAY: f64 = 0.99;

/// An action a relay can be credited or penalized for; maps to a signed
/// point delta (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReputationAction {
    SuccessfulTask,
    UptimeMilestone,
    HighQualityService,
    TaskFailure,
    DroppedConnection,
    MaliciousBehavior,
    Custom(f64),
}

impl ReputationAction {
    fn delta(self) -> f64 {
        match self {
            ReputationAction::SuccessfulTask => 10.0,
            ReputationAction::UptimeMilestone => 5.0,
            ReputationAction::HighQualityService => 20.0,
            ReputationAction::TaskFailure => -15.0,
            ReputationAction::DroppedConnection => -25.0,
            ReputationAction::MaliciousBehavior => -50.0,
            ReputationAction::Custom(n) => n,
        }
    }
}

/// One relay's reputation state (spec §3 `NodeReputation`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReputation {
    pub address: SocketAddr,
    pub stake: u64,
    pub points: f64,
    pub last_updated: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub age_days: u32,
    pub observed_success_rate: f64,
}

impl NodeReputation {
    fn new(address: SocketAddr, stake: u64, now: DateTime<Utc>) -> Self {
        Self {
            address,
            stake,
            points: BASE_POINTS,
            last_updated: now,
            registered_at: now,
            age_days: 0,
            observed_success_rate: 1.0,
        }
    }

    /// True wall-clock age since registration, independent of how often
    /// `apply`/`apply_decay` happen to run.
    fn refresh_age(&mut self, now: DateTime<Utc>) {
        self.age_days = (now - self.registered_at).num_days().max(0) as u32;
    }

    /// Points normalized to `[0, 1]` (spec §3: "Normalized score = points/200").
    pub fn score(&self) -> f64 {
        self.points / MAX_POINTS
    }

    /// Relative weight only, never exposed as a currency amount (spec §3).
    pub fn cost_of_forgery(&self) -> f64 {
        self.stake as f64
            * self.score()
            * (1.0 + self.age_days as f64)
            * (1.0 + self.observed_success_rate)
    }

    fn apply_decay(&mut self, now: DateTime<Utc>) {
        let days_inactive = (now - self.last_updated).num_days().max(0) as f64;
        if days_inactive > 0.0 {
            self.points = (self.points * DECAY_PER_DAY.powf(days_inactive)).clamp(MIN_POINTS, MAX_POINTS);
        }
    }
}

/// Serialized shape of a reputation snapshot (spec §6): round-tripping
/// through `save`/`load` must reproduce every field exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    pub version: u32,
    pub nodes: Vec<NodeReputation>,
}

/// In-memory reputation table for every known relay, with lazy decay
/// applied on read.
#[derive(Debug, Default)]
pub struct ReputationStore {
    nodes: HashMap<SocketAddr, NodeReputation>,
}

impl ReputationStore {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    pub fn register(&mut self, address: SocketAddr, stake: u64, now: DateTime<Utc>) {
        self.nodes
            .entry(address)
            .or_insert_with(|| NodeReputation::new(address, stake, now));
    }

    /// Decay-then-fetch. Returns `None` for an unregistered relay.
    pub fn get(&mut self, address: &SocketAddr, now: DateTime<Utc>) -> Option<&NodeReputation> {
        let node = self.nodes.get_mut(address)?;
        node.apply_decay(now);
        node.refresh_age(now);
        Some(&*node)
    }

    /// Apply a point delta, clamped to `[0, 200]` (spec §4.4).
    pub fn apply(&mut self, address: &SocketAddr, action: ReputationAction, now: DateTime<Utc>) -> FogResult<()> {
        let node = self
            .nodes
            .get_mut(address)
            .ok_or_else(|| FogError::Protocol(format!("unknown relay: {address}")))?;
        node.apply_decay(now);
        node.points = (node.points + action.delta()).clamp(MIN_POINTS, MAX_POINTS);
        node.refresh_age(now);
        node.last_updated = now;
        debug!(%address, points = node.points, "applied reputation action");
        Ok(())
    }

    /// Decay every entry eagerly (spec §4.4: "an explicit `DecayAll`").
    pub fn decay_all(&mut self, now: DateTime<Utc>) {
        for node in self.nodes.values_mut() {
            node.apply_decay(now);
            node.refresh_age(now);
        }
    }

    /// Relays at or above `floor`, as a normalized score in `[0, 1]`.
    pub fn eligible(&self, floor: f64) -> impl Iterator<Item = &NodeReputation> {
        self.nodes.values().filter(move |n| n.score() >= floor)
    }

    pub fn save(&self) -> ReputationSnapshot {
        ReputationSnapshot {
            version: 1,
            nodes: self.nodes.values().cloned().collect(),
        }
    }

    pub fn load(snapshot: ReputationSnapshot) -> Self {
        let nodes = snapshot
            .nodes
            .into_iter()
            .map(|node| (node.address, node))
            .collect();
        Self { nodes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn new_relay_starts_at_base_points() {
        let mut store = ReputationStore::new();
        let now = Utc::now();
        store.register(addr(), 1000, now);
        assert_eq!(store.get(&addr(), now).unwrap().points, BASE_POINTS);
    }

    #[test]
    fn points_clamp_to_max() {
        let mut store = ReputationStore::new();
        let now = Utc::now();
        store.register(addr(), 1000, now);
        for _ in 0..20 {
            store.apply(&addr(), ReputationAction::HighQualityService, now).unwrap();
        }
        assert_eq!(store.get(&addr(), now).unwrap().points, MAX_POINTS);
    }

    #[test]
    fn points_clamp_to_min() {
        let mut store = ReputationStore::new();
        let now = Utc::now();
        store.register(addr(), 1000, now);
        for _ in 0..10 {
            store.apply(&addr(), ReputationAction::MaliciousBehavior, now).unwrap();
        }
        assert_eq!(store.get(&addr(), now).unwrap().points, MIN_POINTS);
    }

    #[test]
    fn decay_reduces_points_after_inactivity() {
        let mut store = ReputationStore::new();
        let now = Utc::now();
        store.register(addr(), 1000, now);
        store.apply(&addr(), ReputationAction::HighQualityService, now).unwrap();
        let later = now + ChronoDuration::days(10);
        let points = store.get(&addr(), later).unwrap().points;
        assert!(points < BASE_POINTS + 20.0);
        assert!(points > MIN_POINTS);
    }

    #[test]
    fn age_days_accumulates_across_closely_spaced_applies() {
        let mut store = ReputationStore::new();
        let day0 = Utc::now();
        store.register(addr(), 1000, day0);

        let day1 = day0 + ChronoDuration::days(1);
        store.apply(&addr(), ReputationAction::SuccessfulTask, day1).unwrap();
        assert_eq!(store.get(&addr(), day1).unwrap().age_days, 1);

        let day2 = day0 + ChronoDuration::days(2);
        store.apply(&addr(), ReputationAction::SuccessfulTask, day2).unwrap();
        assert_eq!(store.get(&addr(), day2).unwrap().age_days, 2);
    }

    #[test]
    fn unknown_relay_apply_is_an_error() {
        let mut store = ReputationStore::new();
        assert!(store.apply(&addr(), ReputationAction::SuccessfulTask, Utc::now()).is_err());
    }

    #[test]
    fn snapshot_round_trips_all_fields() {
        let mut store = ReputationStore::new();
        let now = Utc::now();
        store.register(addr(), 42, now);
        store.apply(&addr(), ReputationAction::SuccessfulTask, now).unwrap();

        let snapshot = store.save();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: ReputationSnapshot = serde_json::from_str(&json).unwrap();
        let reloaded = ReputationStore::load(restored);

        assert_eq!(
            store.nodes.get(&addr()).unwrap(),
            reloaded.nodes.get(&addr()).unwrap()
        );
    }

    #[test]
    fn eligible_excludes_below_floor() {
        let mut store = ReputationStore::new();
        let now = Utc::now();
        let low = "127.0.0.1:9001".parse().unwrap();
        store.register(addr(), 1000, now);
        store.register(low, 1000, now);
        for _ in 0..10 {
            store.apply(&low, ReputationAction::MaliciousBehavior, now).unwrap();
        }
        let eligible: Vec<_> = store.eligible(0.3).map(|n| n.address).collect();
        assert!(eligible.contains(&addr()));
        assert!(!eligible.contains(&low));
    }
}
