//! Start/stop/health/restart engine driving services through the lifecycle
//! state machine over a [`DependencyGraph`] (spec §4.8).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::orchestrator::dag::{DependencyGraph, DependencyKind};
use crate::orchestrator::service::{CompositeHealth, HealthResult, ServiceDescriptor, ServiceState};
use crate::{FogError, FogResult};

const HEALTH_HISTORY_CAPACITY: usize = 100;

struct ServiceRuntime {
    state: ServiceState,
    restart_attempts: u32,
    consecutive_failures: u32,
    consecutive_successes: u32,
    health_history: VecDeque<HealthResult>,
}

impl ServiceRuntime {
    fn new() -> Self {
        Self {
            state: ServiceState::Stopped,
            restart_attempts: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            health_history: VecDeque::with_capacity(HEALTH_HISTORY_CAPACITY),
        }
    }

    fn record_health(&mut self, result: HealthResult) {
        self.health_history.push_back(result);
        while self.health_history.len() > HEALTH_HISTORY_CAPACITY {
            self.health_history.pop_front();
        }
        match result {
            HealthResult::Healthy => {
                self.consecutive_successes += 1;
                self.consecutive_failures = 0;
            }
            HealthResult::Unhealthy => {
                self.consecutive_failures += 1;
                self.consecutive_successes = 0;
            }
        }
    }

    fn uptime_ratio(&self) -> f64 {
        if self.health_history.is_empty() {
            return 0.0;
        }
        let healthy = self
            .health_history
            .iter()
            .filter(|r| **r == HealthResult::Healthy)
            .count();
        healthy as f64 / self.health_history.len() as f64
    }
}

/// Owns the dependency graph, the static descriptors, and the mutable
/// runtime state for every registered service.
pub struct Supervisor {
    config: ServiceConfig,
    graph: tokio::sync::RwLock<DependencyGraph>,
    descriptors: DashMap<String, Arc<ServiceDescriptor>>,
    runtime: DashMap<String, ServiceRuntime>,
}

impl Supervisor {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            graph: tokio::sync::RwLock::new(DependencyGraph::new()),
            descriptors: DashMap::new(),
            runtime: DashMap::new(),
        }
    }

    /// Registers a service, rejecting it (and leaving the graph untouched)
    /// if it would introduce a cycle.
    pub async fn register(&self, descriptor: ServiceDescriptor) -> FogResult<()> {
        let name = descriptor.name.clone();
        self.graph
            .write()
            .await
            .register(&name, descriptor.dependencies.clone())?;
        self.runtime.insert(name.clone(), ServiceRuntime::new());
        self.descriptors.insert(name, Arc::new(descriptor));
        Ok(())
    }

    fn state_of(&self, name: &str) -> ServiceState {
        self.runtime
            .get(name)
            .map(|r| r.state)
            .unwrap_or(ServiceState::Stopped)
    }

    /// Starts every registered service, layer by layer, in ascending
    /// topological order (spec §4.8 "Startup order").
    pub async fn start_all(self: &Arc<Self>) -> FogResult<()> {
        let layers = self.graph.read().await.layers();
        for layer in layers {
            let mut handles = Vec::new();
            for name in layer {
                let this = Arc::clone(self);
                handles.push(tokio::spawn(async move { this.start_one(&name).await }));
            }
            for handle in handles {
                handle
                    .await
                    .map_err(|e| FogError::Dependency(format!("start task panicked: {e}")))??;
            }
        }
        Ok(())
    }

    async fn start_one(self: &Arc<Self>, name: &str) -> FogResult<()> {
        let required_deps = self.graph.read().await.required_dependencies_of(name);
        let blocked: Vec<String> = required_deps
            .iter()
            .filter(|dep| self.state_of(dep) != ServiceState::Running)
            .map(|d| d.to_string())
            .collect();

        let descriptor = self
            .descriptors
            .get(name)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| FogError::Dependency(format!("unregistered service {name}")))?;

        if !blocked.is_empty() {
            if descriptor.is_critical {
                return Err(FogError::Dependency(format!(
                    "critical service {name} blocked on unstarted dependencies: {blocked:?}"
                )));
            }
            warn!(%name, ?blocked, "skipping non-critical service with unstarted dependencies");
            return Ok(());
        }

        self.set_state(name, ServiceState::Starting);
        let started = tokio::time::timeout(self.config.start_timeout, descriptor.handlers.start()).await;

        match started {
            Ok(Ok(())) => {
                self.set_state(name, ServiceState::Running);
                info!(%name, "service started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_state(name, ServiceState::Failed);
                error!(%name, error = %e, "service start_fn failed");
                if descriptor.is_critical {
                    Err(e)
                } else {
                    Ok(())
                }
            }
            Err(_) => {
                self.set_state(name, ServiceState::Failed);
                error!(%name, "service start_fn timed out");
                let timeout_err = FogError::Dependency(format!("{name} start_fn timed out"));
                if descriptor.is_critical {
                    Err(timeout_err)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Stops every service in reverse topological order (spec §4.8).
    pub async fn stop_all(self: &Arc<Self>) {
        let order = self.graph.read().await.shutdown_order();
        for name in order {
            self.stop_one(&name).await;
        }
    }

    async fn stop_one(&self, name: &str) {
        let Some(descriptor) = self.descriptors.get(name).map(|d| Arc::clone(d.value())) else {
            return;
        };
        self.set_state(name, ServiceState::Stopping);
        let stopped = tokio::time::timeout(self.config.shutdown_timeout, descriptor.handlers.stop()).await;
        match stopped {
            Ok(Ok(())) => info!(%name, "service stopped"),
            Ok(Err(e)) => warn!(%name, error = %e, "stop_fn returned an error"),
            Err(_) => warn!(%name, "stop_fn timed out, force-terminating"),
        }
        self.set_state(name, ServiceState::Stopped);
    }

    fn set_state(&self, name: &str, state: ServiceState) {
        if let Some(mut runtime) = self.runtime.get_mut(name) {
            runtime.state = state;
        }
    }

    /// One health-check tick for a single service (spec §4.8: every 30s,
    /// `health_fn` with a 5s timeout, failure/recovery thresholds, ring
    /// buffer of last 100 results).
    pub async fn check_health_once(self: &Arc<Self>, name: &str) {
        let Some(descriptor) = self.descriptors.get(name).map(|d| Arc::clone(d.value())) else {
            return;
        };
        if self.state_of(name) != ServiceState::Running
            && self.state_of(name) != ServiceState::Degraded
            && self.state_of(name) != ServiceState::Unhealthy
        {
            return;
        }

        let result = tokio::time::timeout(self.config.health_timeout, descriptor.handlers.health())
            .await
            .unwrap_or(HealthResult::Unhealthy);

        let (failures, successes) = {
            let mut runtime = self.runtime.get_mut(name).expect("registered service has runtime state");
            runtime.record_health(result);
            (runtime.consecutive_failures, runtime.consecutive_successes)
        };

        if failures >= self.config.failure_threshold {
            if self.state_of(name) != ServiceState::Unhealthy {
                warn!(%name, failures, "service marked Unhealthy, triggering restart");
                self.set_state(name, ServiceState::Unhealthy);
            }
            self.restart(name).await;
        } else if failures > 0 {
            self.set_state(name, ServiceState::Degraded);
        } else if successes >= self.config.recovery_threshold {
            self.set_state(name, ServiceState::Running);
        }
    }

    /// Exponential-backoff restart: `backoff_base^attempt` seconds, up to
    /// `max_restart_attempts`; exhaustion marks the service Failed and stops
    /// restarting (spec §4.8).
    async fn restart(self: &Arc<Self>, name: &str) {
        let attempt = {
            let mut runtime = self.runtime.get_mut(name).expect("registered service has runtime state");
            runtime.restart_attempts += 1;
            runtime.restart_attempts
        };

        if attempt > self.config.max_restart_attempts {
            self.set_state(name, ServiceState::Failed);
            let descriptor = self.descriptors.get(name).map(|d| Arc::clone(d.value()));
            if descriptor.map(|d| d.is_critical).unwrap_or(false) {
                error!(%name, "critical service exhausted restart attempts, composite health Unhealthy");
            }
            return;
        }

        let backoff_secs = self.config.backoff_base.powi(attempt as i32);
        warn!(%name, attempt, backoff_secs, "restarting service after backoff");
        tokio::time::sleep(std::time::Duration::from_secs_f64(backoff_secs)).await;

        let _ = self.start_one(name).await;
        if self.state_of(name) == ServiceState::Running {
            let mut runtime = self.runtime.get_mut(name).expect("registered service has runtime state");
            runtime.restart_attempts = 0;
        }
    }

    /// Spawns the per-service health-monitor loops (spec §5: "one supervisor
    /// task plus one health task per service").
    pub fn spawn_health_monitors(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        self.descriptors
            .iter()
            .map(|entry| {
                let name = entry.key().clone();
                let this = Arc::clone(self);
                let interval = this.config.health_interval;
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    loop {
                        ticker.tick().await;
                        this.check_health_once(&name).await;
                    }
                })
            })
            .collect()
    }

    /// Composite health across every supervised service (spec §4.8).
    pub fn composite_health(&self) -> CompositeHealth {
        if self.runtime.is_empty() {
            return CompositeHealth::Unknown;
        }

        let mut any_data = false;
        let mut unhealthy = false;
        let mut degraded = false;
        let mut all_running_and_healthy = true;

        for entry in self.runtime.iter() {
            let runtime = entry.value();
            if !runtime.health_history.is_empty() {
                any_data = true;
            }
            if runtime.state == ServiceState::Failed
                || runtime.consecutive_failures >= self.config.failure_threshold
            {
                unhealthy = true;
            } else if runtime.consecutive_failures > 0 {
                degraded = true;
            }
            if runtime.state != ServiceState::Running
                || runtime.health_history.back() != Some(&HealthResult::Healthy)
            {
                all_running_and_healthy = false;
            }
        }

        if !any_data {
            CompositeHealth::Unknown
        } else if unhealthy {
            CompositeHealth::Unhealthy
        } else if degraded {
            CompositeHealth::Degraded
        } else if all_running_and_healthy {
            CompositeHealth::Healthy
        } else {
            CompositeHealth::Degraded
        }
    }

    pub fn uptime_ratio(&self, name: &str) -> f64 {
        self.runtime.get(name).map(|r| r.uptime_ratio()).unwrap_or(0.0)
    }

    pub fn state_snapshot(&self) -> HashMap<String, ServiceState> {
        self.runtime
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state))
            .collect()
    }
}
