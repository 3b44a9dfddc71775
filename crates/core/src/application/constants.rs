// Supervision constants (no magic values)
/// Bounded worker pool size
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default stale threshold for watchdog entries (15s)
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 15;

/// Watchdog poll interval (must stay below stale_threshold / 3)
pub const DEFAULT_WATCHDOG_POLL_INTERVAL_MS: u64 = 2_000;

/// Bridge heartbeat timeout (6s), fixed regardless of the metrics interval
pub const HEARTBEAT_TIMEOUT_MS: u64 = 6_000;

/// Failures inside the window that trip the circuit breaker
pub const FAILURE_THRESHOLD: usize = 3;

/// Rolling circuit breaker window (60s)
pub const FAILURE_WINDOW_MS: i64 = 60_000;

/// Grace period between SIGTERM and SIGKILL on stop (2s)
pub const GRACEFUL_STOP_TIMEOUT_MS: u64 = 2_000;

/// Default metrics interval handed to the bridge (1s)
pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 1_000;

/// Supervisor event bus capacity
pub const SUPERVISOR_BUS_CAPACITY: usize = 256;

/// Supervisor command channel capacity
pub const SUPERVISOR_COMMAND_CAPACITY: usize = 32;

/// Longest raw line echoed into logs when a line fails to decode
pub const MAX_LOGGED_LINE_LEN: usize = 200;
