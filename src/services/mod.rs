//! Service implementations
//!
//! The managers (health monitor, restart scheduler, port allocator)
//! plus the production collaborator implementations that handle actual
//! I/O: process launching, host port scanning and in-memory storage.

pub mod health;
pub mod launcher;
pub mod ports;
pub mod restart;
pub mod store;

#[cfg(test)]
mod tests;

pub use health::HealthMonitor;
pub use launcher::RealProcessLauncher;
pub use ports::{PortAllocator, RealPortScanner};
pub use restart::{RestartDecision, RestartScheduler};
pub use store::InMemoryStore;
