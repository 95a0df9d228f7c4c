//! Core data model for the service lifecycle core
//!
//! These are the record types exchanged with the persistence collaborator
//! and the in-memory state the managers operate on. Boolean flags may be
//! stored as 0/1 by a backing store, but they are `bool` at this boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier for a managed service
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a health-check configuration
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckId(String);

impl CheckId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CheckId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CheckId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A managed local service. Owned by the persistence collaborator;
/// referenced by id everywhere else in this core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub command: String,
    pub port: Option<u16>,
    pub depends_on: Vec<ServiceId>,
}

/// A "depends-on" edge between two services
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub service_id: ServiceId,
    pub depends_on_id: ServiceId,
    /// Wait for the dependency to report healthy before starting the dependent
    pub wait_for_health: bool,
    /// Extra delay after the dependency starts, in seconds
    pub startup_delay_secs: u64,
}

impl DependencyEdge {
    pub fn new(service_id: ServiceId, depends_on_id: ServiceId) -> Self {
        Self {
            service_id,
            depends_on_id,
            wait_for_health: false,
            startup_delay_secs: 0,
        }
    }
}

/// Kind-specific probe definition, matched exhaustively at probe time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeSpec {
    Http {
        endpoint: String,
        /// Expected HTTP status, 200 if unset in stored form
        #[serde(default = "default_expected_status")]
        expected_status: u16,
        /// When set, the response body must contain this substring
        expected_body: Option<String>,
    },
    Tcp {
        port: u16,
    },
    Command {
        command: String,
    },
}

fn default_expected_status() -> u16 {
    200
}

/// One health-check configuration; at most one active timer per config
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub id: CheckId,
    pub service_id: ServiceId,
    pub probe: ProbeSpec,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Consecutive failures before the service is marked unhealthy
    pub retries: u32,
    pub enabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
    /// Externally set partial-capacity signal; no internal producer
    Degraded,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Degraded => "degraded",
        };
        write!(f, "{s}")
    }
}

/// Per-service health state, created lazily on first probe
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthState {
    pub service_id: ServiceId,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl HealthState {
    pub fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            last_checked_at: None,
        }
    }
}

/// Health state-transition event, fired exactly once per boundary crossing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthTransition {
    pub service_id: ServiceId,
    pub previous: HealthStatus,
    pub new: HealthStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Immediate,
    Exponential,
    Fixed,
}

/// Per-service automatic restart policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub service_id: ServiceId,
    pub enabled: bool,
    pub max_restarts: u32,
    pub strategy: BackoffStrategy,
    /// Attempts initiated so far; persists until explicitly reset
    pub restart_count: u32,
}

impl RestartPolicy {
    pub fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            enabled: true,
            max_restarts: 3,
            strategy: BackoffStrategy::Exponential,
            restart_count: 0,
        }
    }
}

/// Classification of a detected port conflict
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// Port also held by an unrelated system process
    System,
    /// Port claimed by more than one service record
    Service,
    /// Both of the above at once
    Both,
}

/// One conflicting port with the services implicated in it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortConflict {
    pub port: u16,
    pub kind: ConflictKind,
    pub service_ids: Vec<ServiceId>,
}

/// One port held in the allocator, possibly owned by a service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortAssignment {
    pub port: u16,
    pub service_id: Option<ServiceId>,
}

/// Result of resolving one conflicting service to a fresh port
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortReassignment {
    pub service_id: ServiceId,
    pub old_port: u16,
    pub new_port: u16,
}

/// Outcome of a single probe execution
#[derive(Clone, Debug, PartialEq)]
pub enum ProbeOutcome {
    Success,
    /// Probe completed but did not meet its success criteria
    Failure(String),
    /// Probe did not complete within its timeout budget
    Timeout,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }
}
