//! Health monitoring service
//!
//! Runs one independent periodic task per enabled health-check
//! configuration, keeps the per-service health state, and publishes
//! state-transition events. Probe failures are recorded as state and
//! never surface as errors; a hanging probe for one service cannot
//! delay probes for another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, warn};

use crate::error::{OverseerError, OverseerResult};
use crate::model::{
    CheckId, HealthCheckConfig, HealthState, HealthStatus, HealthTransition, ProbeOutcome,
    ProbeSpec, ServiceId,
};

/// Capacity of the transition broadcast channel; slow subscribers lag
/// rather than block probes.
const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Health monitor with one periodic prober per registered config
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    /// Active probe tasks, at most one per config id
    tasks: Mutex<HashMap<CheckId, JoinHandle<()>>>,
}

struct MonitorInner {
    http: reqwest::Client,
    configs: Mutex<HashMap<CheckId, HealthCheckConfig>>,
    states: Mutex<HashMap<ServiceId, HealthState>>,
    transitions: broadcast::Sender<HealthTransition>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                http: reqwest::Client::new(),
                configs: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
                transitions,
            }),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to health state-transition events
    pub fn subscribe(&self) -> broadcast::Receiver<HealthTransition> {
        self.inner.transitions.subscribe()
    }

    /// Register a health check. Replaces any previous config with the same
    /// id (and its timer). Enabled configs get an independent periodic
    /// probe task; disabled configs are stored but not scheduled.
    pub async fn register_check(&self, config: HealthCheckConfig) -> OverseerResult<()> {
        validate_config(&config)?;

        let id = config.id.clone();

        // At most one active timer per config: drop any previous one first
        {
            let mut tasks = self.tasks.lock().await;
            if let Some(old) = tasks.remove(&id) {
                old.abort();
            }
            if config.enabled {
                let task = spawn_probe_task(Arc::clone(&self.inner), config.clone());
                tasks.insert(id.clone(), task);
            }
        }

        self.inner.configs.lock().await.insert(id.clone(), config);
        debug!("registered health check {id}");
        Ok(())
    }

    /// Update an existing check in place; NotFound if it was never registered
    pub async fn update_check(&self, config: HealthCheckConfig) -> OverseerResult<()> {
        if !self.inner.configs.lock().await.contains_key(&config.id) {
            return Err(OverseerError::not_found("health check", config.id.to_string()));
        }
        self.register_check(config).await
    }

    /// Delete a check and cancel its timer
    pub async fn remove_check(&self, id: &CheckId) -> OverseerResult<()> {
        self.stop_check(id).await;
        self.inner
            .configs
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| OverseerError::not_found("health check", id.to_string()))
    }

    /// Cancel one scheduled probe task; the stored config is untouched
    pub async fn stop_check(&self, id: &CheckId) {
        if let Some(task) = self.tasks.lock().await.remove(id) {
            task.abort();
        }
    }

    /// Cancel all outstanding probe tasks; used on shutdown
    pub async fn cleanup(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, task) in tasks.drain() {
            task.abort();
        }
        debug!("health monitor tasks cancelled");
    }

    /// Execute one probe immediately, applying the result through the
    /// normal state-update path. Works for disabled configs too.
    pub async fn run_check_now(&self, id: &CheckId) -> OverseerResult<ProbeOutcome> {
        let config = self
            .inner
            .configs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OverseerError::not_found("health check", id.to_string()))?;

        let outcome = execute_probe(
            &self.inner.http,
            &config.probe,
            Duration::from_secs(config.timeout_secs),
        )
        .await;
        self.inner
            .apply_result(&config.service_id, config.retries, &outcome)
            .await;
        Ok(outcome)
    }

    /// Current health state for a service, if any probe has run
    pub async fn state_of(&self, service_id: &ServiceId) -> Option<HealthState> {
        self.inner.states.lock().await.get(service_id).cloned()
    }

    pub async fn all_states(&self) -> Vec<HealthState> {
        self.inner.states.lock().await.values().cloned().collect()
    }

    /// Drop a service's health state when the service is deleted
    pub async fn remove_service_state(&self, service_id: &ServiceId) {
        self.inner.states.lock().await.remove(service_id);
    }

    /// Externally set partial-capacity signal. Probes have no path to
    /// Degraded; the next successful probe restores Healthy.
    pub async fn set_degraded(&self, service_id: &ServiceId) {
        let mut states = self.inner.states.lock().await;
        let state = states
            .entry(service_id.clone())
            .or_insert_with(|| HealthState::new(service_id.clone()));
        if state.status != HealthStatus::Degraded {
            let previous = state.status;
            state.status = HealthStatus::Degraded;
            let _ = self.inner.transitions.send(HealthTransition {
                service_id: service_id.clone(),
                previous,
                new: HealthStatus::Degraded,
            });
        }
    }

    /// Registered check configs for one service
    pub async fn checks_of(&self, service_id: &ServiceId) -> Vec<HealthCheckConfig> {
        self.inner
            .configs
            .lock()
            .await
            .values()
            .filter(|c| &c.service_id == service_id)
            .cloned()
            .collect()
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        // Tasks hold only an Arc of the inner state; abort what we can
        // without an async context.
        if let Ok(mut tasks) = self.tasks.try_lock() {
            for (_, task) in tasks.drain() {
                task.abort();
            }
        }
    }
}

impl MonitorInner {
    /// Fold one probe outcome into the per-service state, firing a
    /// transition event exactly once per boundary crossing.
    async fn apply_result(&self, service_id: &ServiceId, retries: u32, outcome: &ProbeOutcome) {
        let mut states = self.states.lock().await;
        let state = states
            .entry(service_id.clone())
            .or_insert_with(|| HealthState::new(service_id.clone()));
        state.last_checked_at = Some(Utc::now());

        let previous = state.status;
        if outcome.is_success() {
            state.consecutive_failures = 0;
            if previous != HealthStatus::Healthy {
                state.status = HealthStatus::Healthy;
            }
        } else {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= retries && previous != HealthStatus::Unhealthy {
                state.status = HealthStatus::Unhealthy;
            }
        }

        if state.status != previous {
            debug!(
                "health transition for {service_id}: {previous} -> {}",
                state.status
            );
            let _ = self.transitions.send(HealthTransition {
                service_id: service_id.clone(),
                previous,
                new: state.status,
            });
        }
    }
}

/// Spawn the independent periodic probe task for one enabled config
fn spawn_probe_task(inner: Arc<MonitorInner>, config: HealthCheckConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.interval_secs));
        let budget = Duration::from_secs(config.timeout_secs);
        loop {
            ticker.tick().await;
            let outcome = execute_probe(&inner.http, &config.probe, budget).await;
            if let ProbeOutcome::Failure(ref reason) = outcome {
                debug!("probe {} failed: {reason}", config.id);
            }
            inner
                .apply_result(&config.service_id, config.retries, &outcome)
                .await;
        }
    })
}

/// Execute a single probe, bounded by `budget`. Never returns an error:
/// anything that keeps the probe from succeeding is a Failure or Timeout.
pub(crate) async fn execute_probe(
    http: &reqwest::Client,
    probe: &ProbeSpec,
    budget: Duration,
) -> ProbeOutcome {
    match probe {
        ProbeSpec::Http {
            endpoint,
            expected_status,
            expected_body,
        } => {
            let request = async {
                let response = http.get(endpoint).send().await?;
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                Ok::<_, reqwest::Error>((status, body))
            };
            match timeout(budget, request).await {
                Err(_) => ProbeOutcome::Timeout,
                Ok(Err(e)) => ProbeOutcome::Failure(format!("http request failed: {e}")),
                Ok(Ok((status, body))) => {
                    if status != *expected_status {
                        ProbeOutcome::Failure(format!(
                            "unexpected status {status}, wanted {expected_status}"
                        ))
                    } else if let Some(needle) = expected_body {
                        if body.contains(needle.as_str()) {
                            ProbeOutcome::Success
                        } else {
                            ProbeOutcome::Failure("response body missing expected content".into())
                        }
                    } else {
                        ProbeOutcome::Success
                    }
                }
            }
        }
        ProbeSpec::Tcp { port } => {
            match timeout(budget, TcpStream::connect(("127.0.0.1", *port))).await {
                Err(_) => ProbeOutcome::Timeout,
                Ok(Err(e)) => ProbeOutcome::Failure(format!("tcp connect failed: {e}")),
                Ok(Ok(_)) => ProbeOutcome::Success,
            }
        }
        ProbeSpec::Command { command } => {
            let mut cmd = tokio::process::Command::new("sh");
            cmd.arg("-c")
                .arg(command)
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .stdin(std::process::Stdio::null())
                .kill_on_drop(true);

            let run = async {
                match cmd.status().await {
                    Ok(status) if status.success() => ProbeOutcome::Success,
                    Ok(status) => ProbeOutcome::Failure(format!("command exited with {status}")),
                    Err(e) => ProbeOutcome::Failure(format!("command failed to run: {e}")),
                }
            };
            match timeout(budget, run).await {
                Err(_) => {
                    warn!("command probe timed out after {budget:?}");
                    ProbeOutcome::Timeout
                }
                Ok(outcome) => outcome,
            }
        }
    }
}

/// Kind-specific field validation for a check config
fn validate_config(config: &HealthCheckConfig) -> OverseerResult<()> {
    match &config.probe {
        ProbeSpec::Http { endpoint, .. } => {
            if endpoint.trim().is_empty() {
                return Err(OverseerError::validation("http check requires an endpoint"));
            }
        }
        ProbeSpec::Tcp { port } => {
            if *port == 0 {
                return Err(OverseerError::validation("tcp check requires a nonzero port"));
            }
        }
        ProbeSpec::Command { command } => {
            if command.trim().is_empty() {
                return Err(OverseerError::validation("command check requires a command"));
            }
        }
    }
    if config.interval_secs == 0 {
        return Err(OverseerError::validation("check interval must be at least 1s"));
    }
    if config.timeout_secs == 0 {
        return Err(OverseerError::validation("check timeout must be at least 1s"));
    }
    if config.retries == 0 {
        return Err(OverseerError::validation("check retries must be at least 1"));
    }
    Ok(())
}
