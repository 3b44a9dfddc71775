// Watchkeeper Infrastructure - System Adapters
// Implements: ProcessSpawner / BridgeProcess

pub mod bridge_process;

pub use bridge_process::TokioProcessSpawner;
