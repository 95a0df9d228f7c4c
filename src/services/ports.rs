//! Port allocation and conflict arbitration
//!
//! The allocator tracks per-service port assignments within one
//! instance and arbitrates against the live system: the host's
//! listening-socket set is queried through the scanner collaborator on
//! every call, never cached, because port usage is volatile.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
#[cfg(target_os = "linux")]
use tracing::debug;
use tracing::info;

#[cfg(not(target_os = "linux"))]
use crate::core::ports::parse_lsof_listen;
#[cfg(target_os = "linux")]
use crate::core::ports::parse_proc_net_tcp;
use crate::core::ports::pick_ports;
use crate::error::{OverseerError, OverseerResult};
use crate::model::{ConflictKind, PortAssignment, PortConflict, PortReassignment, Service, ServiceId};
use crate::traits::PortScanner;

/// Default scan range for development services
pub const DEFAULT_PORT_RANGE: (u16, u16) = (3000, 9999);

/// Tracks port assignments and resolves conflicts against the host
pub struct PortAllocator {
    scanner: Arc<dyn PortScanner>,
    range_start: u16,
    range_end: u16,
    /// port -> owning service; a port maps to at most one service
    assignments: Mutex<HashMap<u16, ServiceId>>,
}

impl PortAllocator {
    pub fn new(scanner: Arc<dyn PortScanner>) -> Self {
        Self {
            scanner,
            range_start: DEFAULT_PORT_RANGE.0,
            range_end: DEFAULT_PORT_RANGE.1,
            assignments: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_range(mut self, start: u16, end: u16) -> Self {
        self.range_start = start;
        self.range_end = end;
        self
    }

    /// Live snapshot of the host's listening TCP ports
    pub async fn used_system_ports(&self) -> OverseerResult<HashSet<u16>> {
        self.scanner.listening_ports().await
    }

    /// True iff `port` is neither listening on the host nor assigned here
    pub async fn is_available(&self, port: u16) -> OverseerResult<bool> {
        let system = self.used_system_ports().await?;
        let assignments = self.assignments.lock().await;
        Ok(!system.contains(&port) && !assignments.contains_key(&port))
    }

    /// Like `is_available` but a port already held by `service_id` itself
    /// does not count against it
    pub async fn is_available_for(&self, port: u16, service_id: &ServiceId) -> OverseerResult<bool> {
        let system = self.used_system_ports().await?;
        let assignments = self.assignments.lock().await;
        let taken_by_other = assignments
            .get(&port)
            .map(|owner| owner != service_id)
            .unwrap_or(false);
        Ok(!system.contains(&port) && !taken_by_other)
    }

    /// Record that `service_id` owns `port`. Fails if another service
    /// already holds it within this allocator.
    pub async fn assign(&self, port: u16, service_id: ServiceId) -> OverseerResult<()> {
        let mut assignments = self.assignments.lock().await;
        if let Some(owner) = assignments.get(&port) {
            if owner != &service_id {
                return Err(OverseerError::validation(format!(
                    "port {port} already assigned to service {owner}"
                )));
            }
        }
        assignments.insert(port, service_id);
        Ok(())
    }

    pub async fn release(&self, port: u16) {
        self.assignments.lock().await.remove(&port);
    }

    /// Drop every port held by one service
    pub async fn release_service(&self, service_id: &ServiceId) {
        self.assignments
            .lock()
            .await
            .retain(|_, owner| owner != service_id);
    }

    pub async fn assignment_of(&self, service_id: &ServiceId) -> Option<u16> {
        self.assignments
            .lock()
            .await
            .iter()
            .find(|(_, owner)| *owner == service_id)
            .map(|(port, _)| *port)
    }

    /// Current assignment table, sorted by port
    pub async fn assignments(&self) -> Vec<PortAssignment> {
        let assignments = self.assignments.lock().await;
        let mut out: Vec<PortAssignment> = assignments
            .iter()
            .map(|(port, owner)| PortAssignment {
                port: *port,
                service_id: Some(owner.clone()),
            })
            .collect();
        out.sort_by_key(|a| a.port);
        out
    }

    /// First available port scanning upward from `start_from` within the
    /// allocator's range
    pub async fn find_available(&self, start_from: u16) -> OverseerResult<u16> {
        let system = self.used_system_ports().await?;
        let assignments = self.assignments.lock().await;

        let start = start_from.max(self.range_start);
        for port in start..=self.range_end {
            if !system.contains(&port) && !assignments.contains_key(&port) {
                return Ok(port);
            }
        }
        Err(OverseerError::NoPortAvailable {
            start: self.range_start,
            end: self.range_end,
        })
    }

    /// `count` distinct available ports, preferring a contiguous block
    pub async fn find_available_multiple(&self, count: usize) -> OverseerResult<Vec<u16>> {
        let system = self.used_system_ports().await?;
        let assignments = self.assignments.lock().await;

        let available: Vec<u16> = (self.range_start..=self.range_end)
            .filter(|port| !system.contains(port) && !assignments.contains_key(port))
            .collect();

        pick_ports(&available, count).ok_or(OverseerError::NoPortAvailable {
            start: self.range_start,
            end: self.range_end,
        })
    }

    /// Classify every conflicting declared port: held by a system process,
    /// claimed by more than one service record, or both
    pub async fn detect_conflicts(&self, services: &[Service]) -> OverseerResult<Vec<PortConflict>> {
        let system = self.used_system_ports().await?;

        let mut claims: HashMap<u16, Vec<ServiceId>> = HashMap::new();
        for service in services {
            if let Some(port) = service.port {
                claims.entry(port).or_default().push(service.id.clone());
            }
        }

        let mut conflicts = Vec::new();
        for (port, mut service_ids) in claims {
            let system_held = system.contains(&port);
            let multi_claimed = service_ids.len() > 1;
            let kind = match (system_held, multi_claimed) {
                (true, true) => ConflictKind::Both,
                (true, false) => ConflictKind::System,
                (false, true) => ConflictKind::Service,
                (false, false) => continue,
            };
            service_ids.sort();
            conflicts.push(PortConflict {
                port,
                kind,
                service_ids,
            });
        }
        conflicts.sort_by_key(|c| c.port);
        Ok(conflicts)
    }

    /// Reassign each conflicting service to the next available port.
    /// For a pure service-conflict the first claimant keeps the port;
    /// a port the system holds frees every claimant.
    pub async fn auto_assign_ports(
        &self,
        conflicts: &[PortConflict],
    ) -> OverseerResult<Vec<PortReassignment>> {
        let mut reassignments = Vec::new();

        for conflict in conflicts {
            let movers: &[ServiceId] = match conflict.kind {
                ConflictKind::Service => &conflict.service_ids[1..],
                ConflictKind::System | ConflictKind::Both => &conflict.service_ids,
            };

            for service_id in movers {
                let new_port = self.find_available(conflict.port.saturating_add(1)).await?;
                self.assign(new_port, service_id.clone()).await?;
                info!(
                    "reassigned {service_id} from conflicting port {} to {new_port}",
                    conflict.port
                );
                reassignments.push(PortReassignment {
                    service_id: service_id.clone(),
                    old_port: conflict.port,
                    new_port,
                });
            }
        }

        Ok(reassignments)
    }
}

/// Scanner over the host's real socket tables
pub struct RealPortScanner;

#[async_trait::async_trait]
impl PortScanner for RealPortScanner {
    #[cfg(target_os = "linux")]
    async fn listening_ports(&self) -> OverseerResult<HashSet<u16>> {
        let mut ports = HashSet::new();
        for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
            match tokio::fs::read_to_string(path).await {
                Ok(contents) => ports.extend(parse_proc_net_tcp(&contents)),
                // tcp6 may be absent when IPv6 is disabled
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(OverseerError::port_scan(format!("reading {path}: {e}")));
                }
            }
        }
        debug!("system port scan found {} listening ports", ports.len());
        Ok(ports)
    }

    #[cfg(not(target_os = "linux"))]
    async fn listening_ports(&self) -> OverseerResult<HashSet<u16>> {
        let output = tokio::process::Command::new("lsof")
            .args(["-iTCP", "-sTCP:LISTEN", "-P", "-n"])
            .output()
            .await
            .map_err(|e| OverseerError::port_scan(format!("running lsof: {e}")))?;
        // lsof exits nonzero when nothing matches; that is an empty set
        Ok(parse_lsof_listen(&String::from_utf8_lossy(&output.stdout)))
    }
}
