// Central Error Type for the Application

use crate::domain::ConnectionId;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Generation error: {0}")]
    Generation(#[from] crate::port::GenerationError),

    #[error("Identity error: {0}")]
    Identity(#[from] crate::port::IdentityError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
