// Supervisor Domain Model

use serde::{Deserialize, Serialize};

/// Lifecycle state of the telemetry bridge supervisor
///
/// Exactly one live child process exists in `Starting`, `Running` and
/// `Degraded`. Once `BreakerOpen` is reached, `start` stays refused for the
/// lifetime of the supervisor, even after `stop` moves it to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Degraded,
    BreakerOpen,
}

impl SupervisorState {
    /// A child process is owned in this state
    pub fn has_process(&self) -> bool {
        matches!(
            self,
            SupervisorState::Starting | SupervisorState::Running | SupervisorState::Degraded
        )
    }

    /// Short user-facing description derived 1:1 from the state
    pub fn describe(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running normally",
            SupervisorState::Degraded => "degraded, retrying",
            SupervisorState::BreakerOpen => "disabled until restart",
        }
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Stopped => write!(f, "STOPPED"),
            SupervisorState::Starting => write!(f, "STARTING"),
            SupervisorState::Running => write!(f, "RUNNING"),
            SupervisorState::Degraded => write!(f, "DEGRADED"),
            SupervisorState::BreakerOpen => write!(f, "BREAKER_OPEN"),
        }
    }
}

/// Category of an operational notice sent on the error channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Transient failure: the process was restarted
    Degraded,
    /// Persistent failure: breaker tripped, no further retries this session
    Disabled,
    /// The process itself reported an error line
    Reported,
}

/// Payload of the supervisor `error(title, message)` signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeNotice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

impl BridgeNotice {
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Degraded,
            title: "Telemetry degraded".to_string(),
            message: message.into(),
        }
    }

    pub fn disabled(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Disabled,
            title: "Telemetry disabled".to_string(),
            message: message.into(),
        }
    }

    pub fn reported(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Reported,
            title: "Telemetry error".to_string(),
            message: message.into(),
        }
    }

    /// Fatal notices should be presented as blocking
    pub fn is_fatal(&self) -> bool {
        self.kind == NoticeKind::Disabled
    }
}
