// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Supervisor unavailable: {0}")]
    SupervisorGone(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
