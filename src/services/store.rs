//! In-memory reference implementation of the persistence collaborator
//!
//! Keeps the demo binary and scenario tests runnable without a
//! database. A relational implementation would live outside this crate;
//! this one exists so every code path through the core can be exercised
//! end to end.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::{OverseerError, OverseerResult};
use crate::model::{CheckId, DependencyEdge, HealthCheckConfig, RestartPolicy, Service, ServiceId};
use crate::traits::ServiceStore;

#[derive(Default)]
pub struct InMemoryStore {
    services: Mutex<HashMap<ServiceId, Service>>,
    edges: Mutex<Vec<DependencyEdge>>,
    checks: Mutex<HashMap<CheckId, HealthCheckConfig>>,
    policies: Mutex<HashMap<ServiceId, RestartPolicy>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a service record; not part of the ServiceStore surface,
    /// which this core only reads and updates
    pub async fn add_service(&self, service: Service) {
        self.services
            .lock()
            .await
            .insert(service.id.clone(), service);
    }

    pub async fn remove_service(&self, id: &ServiceId) {
        self.services.lock().await.remove(id);
        self.edges
            .lock()
            .await
            .retain(|e| &e.service_id != id && &e.depends_on_id != id);
        self.checks.lock().await.retain(|_, c| &c.service_id != id);
        self.policies.lock().await.remove(id);
    }
}

#[async_trait]
impl ServiceStore for InMemoryStore {
    async fn get_service(&self, id: &ServiceId) -> OverseerResult<Service> {
        self.services
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OverseerError::not_found("service", id.to_string()))
    }

    async fn list_services(&self) -> OverseerResult<Vec<Service>> {
        let mut services: Vec<Service> = self.services.lock().await.values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }

    async fn update_service(&self, service: Service) -> OverseerResult<()> {
        let mut services = self.services.lock().await;
        if !services.contains_key(&service.id) {
            return Err(OverseerError::not_found("service", service.id.to_string()));
        }
        services.insert(service.id.clone(), service);
        Ok(())
    }

    async fn list_edges(&self) -> OverseerResult<Vec<DependencyEdge>> {
        Ok(self.edges.lock().await.clone())
    }

    async fn insert_edge(&self, edge: DependencyEdge) -> OverseerResult<()> {
        let mut edges = self.edges.lock().await;
        let duplicate = edges
            .iter()
            .any(|e| e.service_id == edge.service_id && e.depends_on_id == edge.depends_on_id);
        if duplicate {
            return Err(OverseerError::validation(format!(
                "edge {} -> {} already exists",
                edge.service_id, edge.depends_on_id
            )));
        }
        edges.push(edge);
        Ok(())
    }

    async fn delete_edge(
        &self,
        service_id: &ServiceId,
        depends_on_id: &ServiceId,
    ) -> OverseerResult<()> {
        self.edges
            .lock()
            .await
            .retain(|e| !(&e.service_id == service_id && &e.depends_on_id == depends_on_id));
        Ok(())
    }

    async fn list_checks(&self, service_id: &ServiceId) -> OverseerResult<Vec<HealthCheckConfig>> {
        Ok(self
            .checks
            .lock()
            .await
            .values()
            .filter(|c| &c.service_id == service_id)
            .cloned()
            .collect())
    }

    async fn upsert_check(&self, config: HealthCheckConfig) -> OverseerResult<()> {
        self.checks.lock().await.insert(config.id.clone(), config);
        Ok(())
    }

    async fn delete_check(&self, id: &CheckId) -> OverseerResult<()> {
        self.checks.lock().await.remove(id);
        Ok(())
    }

    async fn get_policy(&self, service_id: &ServiceId) -> OverseerResult<Option<RestartPolicy>> {
        Ok(self.policies.lock().await.get(service_id).cloned())
    }

    async fn upsert_policy(&self, policy: RestartPolicy) -> OverseerResult<()> {
        self.policies
            .lock()
            .await
            .insert(policy.service_id.clone(), policy);
        Ok(())
    }
}
