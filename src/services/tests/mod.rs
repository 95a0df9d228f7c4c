//! Service-specific tests
//!
//! Async tests for the health monitor, restart scheduler, port
//! allocator and launcher, each against mock collaborators where the
//! real host would make timing or state nondeterministic.

mod health;

/// Common fixtures for service tests
pub mod common {
    use crate::model::{
        CheckId, HealthCheckConfig, ProbeSpec, Service, ServiceId,
    };

    pub fn test_service(id: &str) -> Service {
        Service {
            id: ServiceId::from(id),
            name: id.to_string(),
            command: "sleep 60".to_string(),
            port: None,
            depends_on: Vec::new(),
        }
    }

    /// A disabled command check so probes only run when driven explicitly
    pub fn command_check(id: &str, service: &str, command: &str, retries: u32) -> HealthCheckConfig {
        HealthCheckConfig {
            id: CheckId::from(id),
            service_id: ServiceId::from(service),
            probe: ProbeSpec::Command {
                command: command.to_string(),
            },
            interval_secs: 1,
            timeout_secs: 5,
            retries,
            enabled: false,
        }
    }
}
