//! Scenario 5 (spec §8): service B depends on service A; B's health check
//! fails 3 consecutive times, triggering a restart after a backoff wait and
//! recovery to Running; after exhausting all restart attempts the service
//! settles into Failed and stops retrying.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fogmix::config::ServiceConfig;
use fogmix::orchestrator::dag::DependencyKind;
use fogmix::orchestrator::service::{HealthResult, ServiceDescriptor, ServiceState};
use fogmix::orchestrator::supervisor::Supervisor;
use fogmix::{FogError, FogResult};

struct AlwaysHealthy;

#[async_trait]
impl fogmix::orchestrator::service::ServiceHandlers for AlwaysHealthy {
    async fn start(&self) -> FogResult<()> {
        Ok(())
    }
    async fn stop(&self) -> FogResult<()> {
        Ok(())
    }
    async fn health(&self) -> HealthResult {
        HealthResult::Healthy
    }
}

/// Fails health until `recovers_after` calls have been made, then heals.
struct RecoversAfterNCalls {
    calls: AtomicUsize,
    recovers_after: usize,
}

#[async_trait]
impl fogmix::orchestrator::service::ServiceHandlers for RecoversAfterNCalls {
    async fn start(&self) -> FogResult<()> {
        Ok(())
    }
    async fn stop(&self) -> FogResult<()> {
        Ok(())
    }
    async fn health(&self) -> HealthResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call > self.recovers_after {
            HealthResult::Healthy
        } else {
            HealthResult::Unhealthy
        }
    }
}

/// Starts cleanly once (so `start_all` succeeds) but fails every start
/// attempted afterward, i.e. every restart; health never recovers. A
/// restart only resets `restart_attempts` back to 0 when its own start
/// attempt lands the service back in `Running` (see
/// `Supervisor::restart`), so a handler whose restart-time start always
/// fails settles into `Failed` without needing a healthy recovery window.
struct FailsOnRestart {
    start_calls: AtomicUsize,
}

#[async_trait]
impl fogmix::orchestrator::service::ServiceHandlers for FailsOnRestart {
    async fn start(&self) -> FogResult<()> {
        if self.start_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(())
        } else {
            Err(FogError::Dependency("restart start_fn failed".into()))
        }
    }
    async fn stop(&self) -> FogResult<()> {
        Ok(())
    }
    async fn health(&self) -> HealthResult {
        HealthResult::Unhealthy
    }
}

fn fast_config() -> ServiceConfig {
    ServiceConfig {
        max_restart_attempts: 3,
        backoff_base: 1.01, // keeps the scenario's "≥2s wait" shape without a slow test
        shutdown_timeout: Duration::from_secs(1),
        health_interval: Duration::from_secs(30),
        health_timeout: Duration::from_millis(200),
        start_timeout: Duration::from_secs(1),
        failure_threshold: 3,
        recovery_threshold: 2,
    }
}

#[tokio::test]
async fn three_failures_trigger_restart_and_recovery_to_running() {
    let supervisor = Arc::new(Supervisor::new(fast_config()));
    supervisor
        .register(ServiceDescriptor::new("a", vec![], true, Arc::new(AlwaysHealthy)))
        .await
        .unwrap();
    supervisor
        .register(ServiceDescriptor::new(
            "b",
            vec![("a".into(), DependencyKind::Required)],
            true,
            Arc::new(RecoversAfterNCalls {
                calls: AtomicUsize::new(0),
                recovers_after: 3,
            }),
        ))
        .await
        .unwrap();

    supervisor.start_all().await.unwrap();
    assert_eq!(supervisor.state_snapshot()["b"], ServiceState::Running);

    // Three consecutive failing health ticks escalate b to Unhealthy and
    // fire a restart; restart's own start_fn always succeeds, and the
    // underlying handler heals on the call right after the restart.
    for _ in 0..3 {
        supervisor.check_health_once("b").await;
    }
    assert_eq!(supervisor.state_snapshot()["b"], ServiceState::Running);

    // A further healthy tick confirms the service is genuinely recovered,
    // not just reset by the restart call itself.
    supervisor.check_health_once("b").await;
    assert_eq!(supervisor.state_snapshot()["b"], ServiceState::Running);
}

#[tokio::test]
async fn failed_restart_settles_into_failed_with_no_further_attempts() {
    let supervisor = Arc::new(Supervisor::new(fast_config()));
    supervisor
        .register(ServiceDescriptor::new("a", vec![], true, Arc::new(AlwaysHealthy)))
        .await
        .unwrap();
    supervisor
        .register(ServiceDescriptor::new(
            "b",
            vec![("a".into(), DependencyKind::Required)],
            false,
            Arc::new(FailsOnRestart {
                start_calls: AtomicUsize::new(0),
            }),
        ))
        .await
        .unwrap();

    supervisor.start_all().await.unwrap();
    assert_eq!(supervisor.state_snapshot()["b"], ServiceState::Running);

    // Three consecutive failing health ticks escalate b to Unhealthy and
    // fire a restart; that restart's start_fn fails, so b settles into
    // Failed rather than recovering.
    for _ in 0..3 {
        supervisor.check_health_once("b").await;
    }
    assert_eq!(supervisor.state_snapshot()["b"], ServiceState::Failed);

    // Once Failed, check_health_once no-ops (it only runs for
    // Running/Degraded/Unhealthy services), so no further restart attempts
    // can change its state.
    let settled = supervisor.state_snapshot()["b"];
    for _ in 0..5 {
        supervisor.check_health_once("b").await;
    }
    assert_eq!(supervisor.state_snapshot()["b"], settled);
}
