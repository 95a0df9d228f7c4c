//! Overseer library for managing workspace-local service lifecycles
//!
//! This library sequences service startup by declared dependencies,
//! probes liveness continuously, restarts unhealthy or crashed services
//! under a bounded backoff policy, and arbitrates network port usage.
//! Persistence, process launching and port scanning are injected
//! collaborators, so every manager is testable in isolation.

pub mod core;
pub mod error;
pub mod model;
pub mod overseer;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use crate::core::DependencyGraph;
pub use error::{OverseerError, OverseerResult};
pub use model::{
    BackoffStrategy, CheckId, ConflictKind, DependencyEdge, HealthCheckConfig, HealthState,
    HealthStatus, HealthTransition, PortAssignment, PortConflict, PortReassignment, ProbeOutcome,
    ProbeSpec, RestartPolicy, Service, ServiceId,
};
pub use overseer::{Overseer, StartOutcome, StartReport};
pub use services::{
    HealthMonitor, InMemoryStore, PortAllocator, RealPortScanner, RealProcessLauncher,
    RestartDecision, RestartScheduler,
};
pub use traits::{PortScanner, ProcessLauncher, ServiceStore};
