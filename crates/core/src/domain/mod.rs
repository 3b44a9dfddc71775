// Domain Layer - Pure state models and invariants

pub mod error;
pub mod failure;
pub mod message;
pub mod supervisor;
pub mod worker;

// Re-exports
pub use error::DomainError;
pub use failure::FailureRecord;
pub use message::{decode_line, BridgeMessage, MetricsSnapshot, ProtocolError};
pub use supervisor::{BridgeNotice, NoticeKind, SupervisorState};
pub use worker::{Worker, WorkerId, WorkerStatus};
