//! Collaborator trait definitions with mockall annotations
//!
//! Persistence, process launching and port scanning are external
//! collaborators of this core. They are injected as trait objects so
//! every manager can be tested against mocks.

use std::collections::HashSet;

use crate::error::OverseerResult;
use crate::model::{DependencyEdge, HealthCheckConfig, RestartPolicy, Service, ServiceId};

/// Persistence collaborator: CRUD over the records this core references.
///
/// Implementations own id generation and storage encoding (e.g. boolean
/// flags as 0/1 columns); the trait surface stays typed.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ServiceStore: Send + Sync {
    async fn get_service(&self, id: &ServiceId) -> OverseerResult<Service>;
    async fn list_services(&self) -> OverseerResult<Vec<Service>>;
    async fn update_service(&self, service: Service) -> OverseerResult<()>;

    async fn list_edges(&self) -> OverseerResult<Vec<DependencyEdge>>;
    async fn insert_edge(&self, edge: DependencyEdge) -> OverseerResult<()>;
    async fn delete_edge(&self, service_id: &ServiceId, depends_on_id: &ServiceId)
        -> OverseerResult<()>;

    async fn list_checks(&self, service_id: &ServiceId) -> OverseerResult<Vec<HealthCheckConfig>>;
    async fn upsert_check(&self, config: HealthCheckConfig) -> OverseerResult<()>;
    async fn delete_check(&self, id: &crate::model::CheckId) -> OverseerResult<()>;

    async fn get_policy(&self, service_id: &ServiceId) -> OverseerResult<Option<RestartPolicy>>;
    async fn upsert_policy(&self, policy: RestartPolicy) -> OverseerResult<()>;
}

/// Process-launcher collaborator: actually starts and stops services.
///
/// The launcher owns the child processes; this core only sequences and
/// heals. `start` on an already-running service is the launcher's restart.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start the service's command, returning the OS pid
    async fn start(&self, service: &Service) -> OverseerResult<u32>;

    /// Stop the service if it is running; a no-op otherwise
    async fn stop(&self, service_id: &ServiceId) -> OverseerResult<()>;

    async fn is_running(&self, service_id: &ServiceId) -> bool;
}

/// Host port-scan collaborator.
///
/// Queried live on every call; listening sockets are volatile and must
/// never be cached by callers.
#[mockall::automock]
#[async_trait::async_trait]
pub trait PortScanner: Send + Sync {
    /// Snapshot of TCP ports currently in LISTEN state on the host
    async fn listening_ports(&self) -> OverseerResult<HashSet<u16>>;
}
