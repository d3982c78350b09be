// Central Error Type for the queue engine

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Type mismatch: expected {expected}: {reason}")]
    TypeMismatch { expected: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue closed: {0}")]
    Closed(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl AppError {
    /// True for failures of the durable layer (open/append/read)
    pub fn is_io_failure(&self) -> bool {
        matches!(self, AppError::Storage(_) | AppError::Io(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Storage adapters hand back plain messages (orphan rules keep sqlx::Error out of core)
impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Storage(err)
    }
}
