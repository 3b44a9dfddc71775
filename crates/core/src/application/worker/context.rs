// Worker Context - the only state a task body shares with the pool

use crate::application::cancel::CancelToken;
use crate::domain::WorkerId;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error returned by a task body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("task observed cancellation")]
    Cancelled,
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::Failed(err.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::Failed(err.to_string())
    }
}

impl From<crate::error::AppError> for TaskError {
    fn from(err: crate::error::AppError) -> Self {
        TaskError::Failed(err.to_string())
    }
}

/// Result of a task body
pub type TaskResult = std::result::Result<serde_json::Value, TaskError>;

/// Liveness signal raised on the worker thread and marshalled to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    Heartbeat,
    Progress(u8),
}

/// Token passed into every task body
///
/// Emission never calls consumer code; it only queues a signal that the
/// pool's monitor task forwards.
pub struct WorkerContext {
    worker_id: WorkerId,
    token: CancelToken,
    liveness: mpsc::UnboundedSender<Liveness>,
}

impl WorkerContext {
    pub(crate) fn new(
        worker_id: WorkerId,
        token: CancelToken,
        liveness: mpsc::UnboundedSender<Liveness>,
    ) -> Self {
        Self {
            worker_id,
            token,
            liveness,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Tasks must poll this; the pool never preempts a running thread
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Convenience for `?` inside task bodies
    pub fn check_cancelled(&self) -> std::result::Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn emit_heartbeat(&self) {
        let _ = self.liveness.send(Liveness::Heartbeat);
    }

    /// Report progress (clamped to 0..=100); also counts as a heartbeat
    pub fn emit_progress(&self, percent: u8) {
        let _ = self.liveness.send(Liveness::Progress(percent.min(100)));
    }
}
