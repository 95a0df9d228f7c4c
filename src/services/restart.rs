//! Restart scheduling service
//!
//! Consumes unhealthy/crash events, computes a backoff delay from the
//! service's policy, and schedules a one-shot deferred restart through
//! the process launcher. The attempt counter increments at schedule
//! time, so a cancel racing a firing task can never double-count, and a
//! task cancelled concurrently with its own firing never restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::core::backoff::restart_delay;
use crate::error::OverseerError;
use crate::model::{HealthStatus, HealthTransition, RestartPolicy, ServiceId};
use crate::traits::{ProcessLauncher, ServiceStore};

/// Outcome of one restart decision, reported to the caller
#[derive(Clone, Debug, PartialEq)]
pub enum RestartDecision {
    /// A deferred restart was scheduled; `attempt` is 1-based
    Scheduled { delay: Duration, attempt: u32 },
    /// Non-fatal: the attempt budget is used up until `reset_count`
    Exhausted,
    /// Policy exists but auto-restart is switched off
    Disabled,
    NoPolicy,
}

struct PendingRestart {
    generation: u64,
    task: JoinHandle<()>,
}

struct SchedulerInner {
    store: Arc<dyn ServiceStore>,
    launcher: Arc<dyn ProcessLauncher>,
    policies: Mutex<HashMap<ServiceId, RestartPolicy>>,
    /// At most one pending deferred restart per service
    pending: Mutex<HashMap<ServiceId, PendingRestart>>,
    next_generation: AtomicU64,
}

/// Scheduler for bounded automatic restarts
#[derive(Clone)]
pub struct RestartScheduler {
    inner: Arc<SchedulerInner>,
}

impl RestartScheduler {
    pub fn new(store: Arc<dyn ServiceStore>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                launcher,
                policies: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Seed policies loaded from the store at startup
    pub async fn load_policies(&self, policies: Vec<RestartPolicy>) {
        let mut map = self.inner.policies.lock().await;
        for policy in policies {
            map.insert(policy.service_id.clone(), policy);
        }
    }

    /// Install or replace a service's restart policy, persisting it
    pub async fn set_policy(&self, policy: RestartPolicy) {
        self.inner.persist_policy(&policy).await;
        self.inner
            .policies
            .lock()
            .await
            .insert(policy.service_id.clone(), policy);
    }

    pub async fn policy_of(&self, service_id: &ServiceId) -> Option<RestartPolicy> {
        self.inner.policies.lock().await.get(service_id).cloned()
    }

    /// Zero the attempt counter, re-enabling auto-restart after exhaustion
    pub async fn reset_count(&self, service_id: &ServiceId) {
        let mut policies = self.inner.policies.lock().await;
        if let Some(policy) = policies.get_mut(service_id) {
            policy.restart_count = 0;
            let snapshot = policy.clone();
            drop(policies);
            self.inner.persist_policy(&snapshot).await;
        }
    }

    /// Feed one health transition; only crossings into Unhealthy matter
    pub async fn handle_transition(&self, transition: &HealthTransition) -> RestartDecision {
        if transition.new != HealthStatus::Unhealthy {
            return RestartDecision::NoPolicy;
        }
        self.request_restart(&transition.service_id).await
    }

    /// Feed a process-exit (crash) observation from the launcher side
    pub async fn notify_exited(&self, service_id: &ServiceId) -> RestartDecision {
        self.request_restart(service_id).await
    }

    /// Clear any pending deferred restart; no side effects otherwise
    pub async fn cancel(&self, service_id: &ServiceId) {
        if let Some(pending) = self.inner.pending.lock().await.remove(service_id) {
            pending.task.abort();
            debug!("cancelled pending restart for {service_id}");
        }
    }

    /// Cancel every pending restart; used on shutdown
    pub async fn cancel_all(&self) {
        let mut pending = self.inner.pending.lock().await;
        for (_, entry) in pending.drain() {
            entry.task.abort();
        }
    }

    /// Services with a restart currently pending
    pub async fn pending_services(&self) -> Vec<ServiceId> {
        self.inner.pending.lock().await.keys().cloned().collect()
    }

    /// Spawn the event loop that drives restarts from monitor transitions.
    /// The loop ends when the sender side is dropped.
    pub fn spawn_event_loop(
        &self,
        mut events: tokio::sync::broadcast::Receiver<HealthTransition>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(transition) => {
                        scheduler.handle_transition(&transition).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("restart scheduler lagged, dropped {missed} transitions");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Decision path shared by unhealthy transitions and crash reports
    async fn request_restart(&self, service_id: &ServiceId) -> RestartDecision {
        let mut policies = self.inner.policies.lock().await;
        let Some(policy) = policies.get_mut(service_id) else {
            debug!("no restart policy for {service_id}; ignoring");
            return RestartDecision::NoPolicy;
        };
        if !policy.enabled {
            return RestartDecision::Disabled;
        }
        if policy.restart_count >= policy.max_restarts {
            warn!(
                "restart budget exhausted for {service_id} ({} attempts); not scheduling",
                policy.max_restarts
            );
            return RestartDecision::Exhausted;
        }

        let delay = restart_delay(policy.strategy, policy.restart_count);
        // Schedule-time increment: the attempt is counted the moment it
        // is committed, not when the deferred task fires.
        policy.restart_count += 1;
        let attempt = policy.restart_count;
        let snapshot = policy.clone();
        drop(policies);

        self.inner.persist_policy(&snapshot).await;
        self.schedule(service_id.clone(), delay).await;

        info!("restart attempt {attempt} for {service_id} scheduled in {delay:?}");
        RestartDecision::Scheduled { delay, attempt }
    }

    /// Commit one deferred restart, replacing any restart already pending
    /// for the service. The generation tag makes cancellation race-free:
    /// a firing task only proceeds if it is still the registered entry.
    async fn schedule(&self, service_id: ServiceId, delay: Duration) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task_service_id = service_id.clone();

        // Holding the pending lock across spawn+insert means the task,
        // even with a zero delay, cannot observe the map before its own
        // entry exists.
        let mut pending = self.inner.pending.lock().await;
        if let Some(old) = pending.remove(&service_id) {
            old.task.abort();
        }

        let task = tokio::spawn(async move {
            sleep(delay).await;

            {
                let mut pending = inner.pending.lock().await;
                match pending.get(&task_service_id) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&task_service_id);
                    }
                    // Cancelled or superseded while sleeping
                    _ => return,
                }
            }

            inner.fire_restart(&task_service_id).await;
        });

        pending.insert(service_id, PendingRestart { generation, task });
    }
}

impl SchedulerInner {
    /// Ask the launcher to restart the service; a service the store no
    /// longer knows is logged and discarded, never raised.
    async fn fire_restart(&self, service_id: &ServiceId) {
        let service = match self.store.get_service(service_id).await {
            Ok(service) => service,
            Err(OverseerError::NotFound { .. }) => {
                warn!("restart fired for removed service {service_id}; discarding");
                return;
            }
            Err(e) => {
                warn!("could not load {service_id} for restart: {e}");
                return;
            }
        };

        match self.launcher.start(&service).await {
            Ok(pid) => info!("restarted {} (pid {pid})", service.name),
            Err(e) => warn!("restart of {} failed: {e}", service.name),
        }
    }

    /// Best-effort policy persistence; a storage hiccup must not block
    /// the restart path.
    async fn persist_policy(&self, policy: &RestartPolicy) {
        if let Err(e) = self.store.upsert_policy(policy.clone()).await {
            warn!("failed to persist restart policy for {}: {e}", policy.service_id);
        }
    }
}
