// Application Layer - Supervision services

pub mod bus;
pub mod cancel;
pub mod constants;
pub mod panic_guard;
pub mod supervisor;
pub mod watchdog;
pub mod worker;

// Re-exports
pub use bus::Bus;
pub use cancel::CancelToken;
pub use supervisor::{SupervisorConfig, SupervisorEvent, TelemetryBridge};
pub use watchdog::{WatchdogConfig, WatchdogHandle, WorkerStalled, WorkerWatchdog};
pub use worker::{PoolConfig, TaskError, TaskResult, WorkerContext, WorkerEvent, WorkerPool};
