// Port Layer - Interfaces for external dependencies

pub mod bridge_process;
pub mod id_provider; // For deterministic testing
pub mod time_provider;

// Re-exports
pub use bridge_process::{
    BridgeCommand, BridgeProcess, ProcessSpawner, SpawnError, INTERVAL_PLACEHOLDER,
};
pub use id_provider::IdProvider;
pub use time_provider::TimeProvider;
