//! Service descriptor and lifecycle state (spec §3 `ServiceDescriptor`,
//! §4.8 states).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::orchestrator::dag::DependencyKind;
use crate::FogResult;

/// Result of one `health_fn` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthResult {
    Healthy,
    Unhealthy,
}

/// The three operations a service exposes to the supervisor. Implemented as
/// a trait rather than bare closures so a service can carry its own state
/// (a handle, a child process, a pool) behind `&self`.
#[async_trait]
pub trait ServiceHandlers: Send + Sync {
    async fn start(&self) -> FogResult<()>;
    async fn stop(&self) -> FogResult<()>;
    async fn health(&self) -> HealthResult;
}

/// Static registration data for one service (spec §3). `ServiceState` is
/// tracked separately by the supervisor since it changes at runtime.
pub struct ServiceDescriptor {
    pub name: String,
    pub dependencies: Vec<(String, DependencyKind)>,
    pub is_critical: bool,
    pub handlers: Arc<dyn ServiceHandlers>,
}

impl ServiceDescriptor {
    pub fn new(
        name: impl Into<String>,
        dependencies: Vec<(String, DependencyKind)>,
        is_critical: bool,
        handlers: Arc<dyn ServiceHandlers>,
    ) -> Self {
        Self {
            name: name.into(),
            dependencies,
            is_critical,
            handlers,
        }
    }
}

/// Lifecycle state machine (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Degraded,
    Unhealthy,
    Stopping,
    Failed,
}

/// Composite health across every supervised service (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}
