// Worker Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Worker ID (UUID v4)
pub type WorkerId = String;

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Pending,
    Running,
    Cancelled,
    Completed,
    Failed,
    TimedOut,
}

impl WorkerStatus {
    /// Terminal statuses are reached exactly once per worker
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerStatus::Pending | WorkerStatus::Running)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Pending => write!(f, "PENDING"),
            WorkerStatus::Running => write!(f, "RUNNING"),
            WorkerStatus::Cancelled => write!(f, "CANCELLED"),
            WorkerStatus::Completed => write!(f, "COMPLETED"),
            WorkerStatus::Failed => write!(f, "FAILED"),
            WorkerStatus::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Worker Entity
///
/// Bookkeeping record for one submitted unit of work. The cancellation flag
/// lives in `WorkerContext`; this record only tracks lifecycle and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub status: WorkerStatus,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub last_heartbeat: Option<i64>,

    pub timeout_ms: Option<i64>,
    pub progress: u8,
}

impl Worker {
    /// Create a new pending worker
    ///
    /// # Arguments
    ///
    /// * `id` - Unique worker ID (injected, not generated)
    /// * `name` - Human readable task name (for logs)
    /// * `created_at` - Submission timestamp in epoch ms (injected, not system time)
    /// * `timeout_ms` - Optional wall-clock budget once running
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        created_at: i64,
        timeout_ms: Option<i64>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: WorkerStatus::Pending,
            created_at,
            started_at: None,
            finished_at: None,
            last_heartbeat: None,
            timeout_ms,
            progress: 0,
        }
    }

    /// Transition Pending -> Running with explicit timestamp
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.status != WorkerStatus::Pending {
            return Err(self.invalid(WorkerStatus::Running));
        }
        self.status = WorkerStatus::Running;
        self.started_at = Some(now_millis);
        self.last_heartbeat = Some(now_millis);
        Ok(())
    }

    /// Record liveness (and optionally progress) from the task body
    pub fn heartbeat(&mut self, now_millis: i64, progress: Option<u8>) {
        self.last_heartbeat = Some(now_millis);
        if let Some(pct) = progress {
            self.progress = pct.min(100);
        }
    }

    /// Move to a terminal status with explicit timestamp
    ///
    /// Only one terminal transition is accepted; a second one is rejected so
    /// callers can never emit two terminal signals for the same worker.
    /// Pending workers may only be cancelled or failed (pool closed before they ran).
    pub fn finish(&mut self, status: WorkerStatus, now_millis: i64) -> Result<()> {
        let allowed = match self.status {
            WorkerStatus::Running => status.is_terminal(),
            WorkerStatus::Pending => {
                matches!(status, WorkerStatus::Cancelled | WorkerStatus::Failed)
            }
            _ => false,
        };
        if !allowed {
            return Err(self.invalid(status));
        }
        self.status = status;
        self.finished_at = Some(now_millis);
        if status == WorkerStatus::Completed {
            self.progress = 100;
        }
        Ok(())
    }

    fn invalid(&self, to: WorkerStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_lifecycle() {
        let mut worker = Worker::new("w-1", "scan", 1000, Some(500));
        assert_eq!(worker.status, WorkerStatus::Pending);
        assert!(worker.started_at.is_none());

        worker.start(2000).unwrap();
        assert_eq!(worker.status, WorkerStatus::Running);
        assert_eq!(worker.last_heartbeat, Some(2000));

        worker.heartbeat(2500, Some(40));
        assert_eq!(worker.progress, 40);
        assert_eq!(worker.last_heartbeat, Some(2500));

        worker.finish(WorkerStatus::Completed, 4000).unwrap();
        assert_eq!(worker.status, WorkerStatus::Completed);
        assert_eq!(worker.finished_at, Some(4000));
        assert_eq!(worker.progress, 100);
    }

    #[test]
    fn test_second_terminal_transition_rejected() {
        let mut worker = Worker::new("w-2", "scan", 0, None);
        worker.start(10).unwrap();
        worker.finish(WorkerStatus::TimedOut, 20).unwrap();

        let err = worker.finish(WorkerStatus::Completed, 30).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(worker.status, WorkerStatus::TimedOut);
    }

    #[test]
    fn test_pending_worker_never_completes() {
        let mut worker = Worker::new("w-3", "scan", 0, None);
        assert!(worker.finish(WorkerStatus::Completed, 5).is_err());
        assert!(worker.finish(WorkerStatus::TimedOut, 5).is_err());
        assert!(worker.finish(WorkerStatus::Cancelled, 5).is_ok());
        assert!(worker.start(6).is_err());
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut worker = Worker::new("w-4", "scan", 0, None);
        worker.start(0).unwrap();
        worker.heartbeat(1, Some(250));
        assert_eq!(worker.progress, 100);
    }
}
