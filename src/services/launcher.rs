//! Real process launcher implementation
//!
//! Spawns service commands through the shell, tracks the children, and
//! stops them gracefully (SIGTERM with a bounded grace period, then
//! kill). The orchestration core only ever talks to this through the
//! ProcessLauncher trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{OverseerError, OverseerResult};
use crate::model::{Service, ServiceId};
use crate::traits::ProcessLauncher;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Launcher backed by tokio child processes
pub struct RealProcessLauncher {
    children: Mutex<HashMap<ServiceId, Child>>,
    grace_period: Duration,
}

impl RealProcessLauncher {
    pub fn new() -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Configure the SIGTERM-to-kill grace period (fluent API)
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    fn is_child_running(child: &mut Child) -> bool {
        match child.try_wait() {
            Ok(None) => true,     // Still running
            Ok(Some(_)) => false, // Exited
            Err(_) => false,      // Error checking status
        }
    }

    /// Ask the child to exit, escalating to kill after the grace period
    async fn terminate(&self, service_id: &ServiceId, mut child: Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            match tokio::time::timeout(self.grace_period, child.wait()).await {
                Ok(_) => {
                    debug!("service {service_id} exited on SIGTERM");
                    return;
                }
                Err(_) => {
                    warn!("service {service_id} ignored SIGTERM; killing");
                }
            }
        }

        let _ = child.kill().await;
        let _ = child.wait().await;
        debug!("service {service_id} stopped");
    }
}

impl Default for RealProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLauncher for RealProcessLauncher {
    async fn start(&self, service: &Service) -> OverseerResult<u32> {
        if service.command.trim().is_empty() {
            return Err(OverseerError::validation(format!(
                "service {} has no start command",
                service.name
            )));
        }

        // Restarting an already-tracked service replaces its child
        if let Some(old) = self.children.lock().await.remove(&service.id) {
            self.terminate(&service.id, old).await;
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&service.command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(port) = service.port {
            cmd.env("PORT", port.to_string());
        }

        let child = cmd
            .spawn()
            .map_err(|e| OverseerError::launch(service.id.to_string(), e.to_string()))?;

        let pid = child.id().ok_or_else(|| {
            OverseerError::launch(service.id.to_string(), "process exited before pid was read")
        })?;

        self.children.lock().await.insert(service.id.clone(), child);
        debug!("🚀 started {} (pid {pid})", service.name);
        Ok(pid)
    }

    async fn stop(&self, service_id: &ServiceId) -> OverseerResult<()> {
        if let Some(child) = self.children.lock().await.remove(service_id) {
            self.terminate(service_id, child).await;
        }
        Ok(())
    }

    async fn is_running(&self, service_id: &ServiceId) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(service_id) {
            Some(child) => {
                if Self::is_child_running(child) {
                    true
                } else {
                    // Reap the exited child so the map reflects reality
                    children.remove(service_id);
                    false
                }
            }
            None => false,
        }
    }
}
