//! Overseer facade: wires the managers together
//!
//! Owns the dependency graph, health monitor, restart scheduler and
//! port allocator, talks to the injected collaborators, and exposes the
//! operation surface the API layer consumes. Starting a batch never
//! aborts on a single bad service; each service gets its own report.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::DependencyGraph;
use crate::error::{OverseerError, OverseerResult};
use crate::model::{
    CheckId, DependencyEdge, HealthCheckConfig, HealthState, HealthStatus, HealthTransition,
    PortConflict, PortReassignment, ProbeOutcome, RestartPolicy, Service, ServiceId,
};
use crate::services::{HealthMonitor, PortAllocator, RestartDecision, RestartScheduler};
use crate::traits::{PortScanner, ProcessLauncher, ServiceStore};

/// How long `wait_for_health` edges block before giving up on a dependency
const DEFAULT_HEALTH_WAIT: Duration = Duration::from_secs(60);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Per-service outcome of a batch start or stop
#[derive(Clone, Debug)]
pub struct StartReport {
    pub service_id: ServiceId,
    pub outcome: StartOutcome,
}

#[derive(Clone, Debug)]
pub enum StartOutcome {
    Started { pid: u32, port: Option<u16> },
    Failed { reason: String },
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started { .. })
    }
}

/// Main lifecycle coordinator, constructed with injected collaborators
pub struct Overseer {
    store: Arc<dyn ServiceStore>,
    launcher: Arc<dyn ProcessLauncher>,
    graph: Mutex<DependencyGraph>,
    monitor: HealthMonitor,
    scheduler: RestartScheduler,
    allocator: PortAllocator,
    health_wait: Duration,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Overseer {
    pub fn new(
        store: Arc<dyn ServiceStore>,
        launcher: Arc<dyn ProcessLauncher>,
        scanner: Arc<dyn PortScanner>,
    ) -> Self {
        let scheduler = RestartScheduler::new(Arc::clone(&store), Arc::clone(&launcher));
        Self {
            store,
            launcher,
            graph: Mutex::new(DependencyGraph::new()),
            monitor: HealthMonitor::new(),
            scheduler,
            allocator: PortAllocator::new(scanner),
            health_wait: DEFAULT_HEALTH_WAIT,
            event_loop: Mutex::new(None),
        }
    }

    /// Configure the wait budget for `wait_for_health` edges (fluent API)
    pub fn with_health_wait(mut self, health_wait: Duration) -> Self {
        self.health_wait = health_wait;
        self
    }

    /// Load persisted edges and policies, then start feeding monitor
    /// transitions into the restart scheduler
    pub async fn initialize(&self) -> OverseerResult<()> {
        let edges = self.store.list_edges().await?;
        let edge_count = edges.len();
        *self.graph.lock().await = DependencyGraph::from_edges(edges)?;

        let mut policies = Vec::new();
        for service in self.store.list_services().await? {
            if let Some(policy) = self.store.get_policy(&service.id).await? {
                policies.push(policy);
            }
        }
        let policy_count = policies.len();
        self.scheduler.load_policies(policies).await;

        let handle = self.scheduler.spawn_event_loop(self.monitor.subscribe());
        *self.event_loop.lock().await = Some(handle);

        info!("overseer initialized: {edge_count} edges, {policy_count} restart policies");
        Ok(())
    }

    // ---- dependency graph ----

    /// Add a depends-on edge; rejected if it would close a cycle
    pub async fn add_dependency(&self, edge: DependencyEdge) -> OverseerResult<()> {
        let mut graph = self.graph.lock().await;
        graph.add_edge(edge.clone())?;
        if let Err(e) = self.store.insert_edge(edge.clone()).await {
            // Keep graph and store in step on persistence failure
            graph.remove_edge(&edge.service_id, &edge.depends_on_id);
            return Err(e);
        }
        Ok(())
    }

    pub async fn remove_dependency(
        &self,
        service_id: &ServiceId,
        depends_on_id: &ServiceId,
    ) -> OverseerResult<()> {
        self.store.delete_edge(service_id, depends_on_id).await?;
        self.graph.lock().await.remove_edge(service_id, depends_on_id);
        Ok(())
    }

    pub async fn dependencies_of(&self, service_id: &ServiceId) -> Vec<ServiceId> {
        self.graph.lock().await.dependencies_of(service_id)
    }

    pub async fn dependents_of(&self, service_id: &ServiceId) -> Vec<ServiceId> {
        self.graph.lock().await.dependents_of(service_id)
    }

    /// Adjacency snapshot for visualization
    pub async fn dependency_graph(
        &self,
    ) -> std::collections::BTreeMap<ServiceId, Vec<ServiceId>> {
        self.graph.lock().await.adjacency()
    }

    pub async fn startup_order(&self, service_ids: &[ServiceId]) -> OverseerResult<Vec<ServiceId>> {
        self.graph.lock().await.startup_order(service_ids)
    }

    // ---- lifecycle ----

    /// Start a set of services in dependency order. One service failing
    /// to start is reported, not fatal to the batch.
    pub async fn start_services(&self, service_ids: &[ServiceId]) -> OverseerResult<Vec<StartReport>> {
        let order = self.startup_order(service_ids).await?;
        let mut reports = Vec::with_capacity(order.len());

        for service_id in order {
            let outcome = match self.start_one(&service_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("failed to start {service_id}: {e}");
                    StartOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            reports.push(StartReport {
                service_id,
                outcome,
            });
        }
        Ok(reports)
    }

    /// Stop services in reverse dependency order, clearing pending
    /// restarts and probe timers first so nothing revives them
    pub async fn stop_services(&self, service_ids: &[ServiceId]) -> OverseerResult<()> {
        let mut order = self.startup_order(service_ids).await?;
        order.reverse();

        for service_id in order {
            self.stop_one(&service_id).await?;
        }
        Ok(())
    }

    pub async fn stop_service(&self, service_id: &ServiceId) -> OverseerResult<()> {
        self.stop_one(service_id).await
    }

    /// Report a crash observed by the launcher side
    pub async fn report_exit(&self, service_id: &ServiceId) -> RestartDecision {
        self.scheduler.notify_exited(service_id).await
    }

    /// Cancel everything outstanding; call before dropping collaborators
    pub async fn shutdown(&self) {
        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }
        self.scheduler.cancel_all().await;
        self.monitor.cleanup().await;
        info!("overseer shut down");
    }

    // ---- health checks ----

    pub async fn register_health_check(&self, config: HealthCheckConfig) -> OverseerResult<()> {
        self.monitor.register_check(config.clone()).await?;
        self.store.upsert_check(config).await
    }

    pub async fn update_health_check(&self, config: HealthCheckConfig) -> OverseerResult<()> {
        self.monitor.update_check(config.clone()).await?;
        self.store.upsert_check(config).await
    }

    pub async fn delete_health_check(&self, id: &CheckId) -> OverseerResult<()> {
        self.monitor.remove_check(id).await?;
        self.store.delete_check(id).await
    }

    /// Execute one probe immediately through the normal state path
    pub async fn run_health_check_now(&self, id: &CheckId) -> OverseerResult<ProbeOutcome> {
        self.monitor.run_check_now(id).await
    }

    pub async fn health_state(&self, service_id: &ServiceId) -> Option<HealthState> {
        self.monitor.state_of(service_id).await
    }

    pub async fn all_health_states(&self) -> Vec<HealthState> {
        self.monitor.all_states().await
    }

    pub async fn set_degraded(&self, service_id: &ServiceId) {
        self.monitor.set_degraded(service_id).await;
    }

    pub fn subscribe_transitions(&self) -> tokio::sync::broadcast::Receiver<HealthTransition> {
        self.monitor.subscribe()
    }

    // ---- restart policy ----

    pub async fn set_restart_policy(&self, policy: RestartPolicy) {
        self.scheduler.set_policy(policy).await;
    }

    pub async fn restart_policy(&self, service_id: &ServiceId) -> Option<RestartPolicy> {
        self.scheduler.policy_of(service_id).await
    }

    pub async fn reset_restart_count(&self, service_id: &ServiceId) {
        self.scheduler.reset_count(service_id).await;
    }

    // ---- ports ----

    pub async fn is_port_available(&self, port: u16) -> OverseerResult<bool> {
        self.allocator.is_available(port).await
    }

    pub async fn find_available_port(&self, start_from: u16) -> OverseerResult<u16> {
        self.allocator.find_available(start_from).await
    }

    pub async fn find_available_ports(&self, count: usize) -> OverseerResult<Vec<u16>> {
        self.allocator.find_available_multiple(count).await
    }

    pub async fn detect_port_conflicts(&self) -> OverseerResult<Vec<PortConflict>> {
        let services = self.store.list_services().await?;
        self.allocator.detect_conflicts(&services).await
    }

    /// Detect conflicts and move every implicated service to a fresh
    /// port, persisting the new assignments
    pub async fn auto_assign_ports(&self) -> OverseerResult<Vec<PortReassignment>> {
        let conflicts = self.detect_port_conflicts().await?;
        let reassignments = self.allocator.auto_assign_ports(&conflicts).await?;

        for reassignment in &reassignments {
            let mut service = self.store.get_service(&reassignment.service_id).await?;
            service.port = Some(reassignment.new_port);
            self.store.update_service(service).await?;
        }
        Ok(reassignments)
    }

    // ---- internals ----

    async fn start_one(&self, service_id: &ServiceId) -> OverseerResult<StartOutcome> {
        let mut service = self.store.get_service(service_id).await?;

        // Honor the declared edge options before touching the process
        let edges: Vec<DependencyEdge> = {
            let graph = self.graph.lock().await;
            graph.edges_of(service_id).into_iter().cloned().collect()
        };
        for edge in &edges {
            if edge.startup_delay_secs > 0 {
                debug!(
                    "delaying {service_id} for {}s after {}",
                    edge.startup_delay_secs, edge.depends_on_id
                );
                tokio::time::sleep(Duration::from_secs(edge.startup_delay_secs)).await;
            }
            if edge.wait_for_health {
                self.wait_until_healthy(&edge.depends_on_id).await?;
            }
        }

        let port = self.resolve_port(&mut service).await?;

        let pid = match self.launcher.start(&service).await {
            Ok(pid) => pid,
            Err(e) => {
                if let Some(port) = port {
                    self.allocator.release(port).await;
                }
                return Err(e);
            }
        };

        // Only now wire up the probes; registering earlier would count
        // startup time as failures
        for check in self.store.list_checks(service_id).await? {
            if check.enabled {
                self.monitor.register_check(check).await?;
            }
        }

        info!("▶️  started {} (pid {pid})", service.name);
        Ok(StartOutcome::Started { pid, port })
    }

    async fn stop_one(&self, service_id: &ServiceId) -> OverseerResult<()> {
        self.scheduler.cancel(service_id).await;
        for check in self.monitor.checks_of(service_id).await {
            self.monitor.stop_check(&check.id).await;
        }
        self.launcher.stop(service_id).await?;
        self.allocator.release_service(service_id).await;
        debug!("stopped {service_id}");
        Ok(())
    }

    /// Resolve the service's port: keep the declared one when free,
    /// otherwise move to the next available and persist the change
    async fn resolve_port(&self, service: &mut Service) -> OverseerResult<Option<u16>> {
        let Some(declared) = service.port else {
            return Ok(None);
        };

        if self
            .allocator
            .is_available_for(declared, &service.id)
            .await?
        {
            self.allocator.assign(declared, service.id.clone()).await?;
            return Ok(Some(declared));
        }

        let new_port = self
            .allocator
            .find_available(declared.saturating_add(1))
            .await?;
        self.allocator.assign(new_port, service.id.clone()).await?;
        warn!(
            "port {declared} unavailable for {}; moved to {new_port}",
            service.name
        );

        service.port = Some(new_port);
        self.store.update_service(service.clone()).await?;
        Ok(Some(new_port))
    }

    /// Bounded poll until a dependency reports healthy
    async fn wait_until_healthy(&self, dependency_id: &ServiceId) -> OverseerResult<()> {
        let deadline = tokio::time::Instant::now() + self.health_wait;
        loop {
            if let Some(state) = self.monitor.state_of(dependency_id).await {
                if state.status == HealthStatus::Healthy {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OverseerError::launch(
                    dependency_id.to_string(),
                    format!(
                        "dependency did not become healthy within {:?}",
                        self.health_wait
                    ),
                ));
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }
}
