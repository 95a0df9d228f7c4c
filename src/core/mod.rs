//! Pure business logic modules
//!
//! No I/O dependencies here: graph ordering, backoff math and port-scan
//! parsing are all deterministic and testable in isolation.

pub mod backoff;
pub mod graph;
pub mod ports;

pub use graph::DependencyGraph;
