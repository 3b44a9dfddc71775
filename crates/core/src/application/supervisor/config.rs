// Supervisor configuration

use crate::application::constants::{
    FAILURE_THRESHOLD, FAILURE_WINDOW_MS, GRACEFUL_STOP_TIMEOUT_MS, HEARTBEAT_TIMEOUT_MS,
    SUPERVISOR_BUS_CAPACITY,
};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Silence tolerated before the process counts as hung (fixed, not scaled by interval)
    pub heartbeat_timeout_ms: u64,
    /// Failures within the window that open the breaker
    pub failure_threshold: usize,
    pub failure_window_ms: i64,
    /// SIGTERM to SIGKILL grace on stop
    pub stop_grace_ms: u64,
    pub bus_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT_MS,
            failure_threshold: FAILURE_THRESHOLD,
            failure_window_ms: FAILURE_WINDOW_MS,
            stop_grace_ms: GRACEFUL_STOP_TIMEOUT_MS,
            bus_capacity: SUPERVISOR_BUS_CAPACITY,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout_ms == 0 {
            return Err(AppError::Config("heartbeat_timeout_ms must be > 0".to_string()));
        }
        if self.failure_threshold == 0 {
            return Err(AppError::Config("failure_threshold must be > 0".to_string()));
        }
        if self.failure_window_ms <= 0 {
            return Err(AppError::Config("failure_window_ms must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(6));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.failure_window_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = SupervisorConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let config = SupervisorConfig {
            heartbeat_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
