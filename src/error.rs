//! Overseer-specific error types
//!
//! None of these are fatal to the orchestration core: probe failures are
//! recorded as state, restart exhaustion is reported, and everything else
//! surfaces as a typed failure to the caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverseerError {
    #[error("Invalid configuration: {message}")]
    Validation { message: String },

    #[error("Dependency cycle: {service_id} -> {depends_on_id} closes a path back to {service_id}")]
    CycleDetected {
        service_id: String,
        depends_on_id: String,
    },

    #[error("No available port in range {start}..={end}")]
    NoPortAvailable { start: u16, end: u16 },

    #[error("Restart budget exhausted for {service_id}: {max_restarts} attempts used")]
    RestartExhausted {
        service_id: String,
        max_restarts: u32,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Persistence operation failed: {message}")]
    Persistence { message: String },

    #[error("Failed to launch {service_id}: {message}")]
    Launch {
        service_id: String,
        message: String,
    },

    #[error("Port scan failed: {message}")]
    PortScan { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OverseerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn launch(service_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Launch {
            service_id: service_id.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn port_scan(message: impl Into<String>) -> Self {
        Self::PortScan {
            message: message.into(),
        }
    }
}

pub type OverseerResult<T> = Result<T, OverseerError>;
