//! Error types for the throttling service.

use thiserror::Error;

/// Main error type for throttling operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// A rule name was used that was never registered with the throttler
    #[error("Throttle rule not found: {0}")]
    RuleNotFound(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event store errors, passed through as the driver reported them
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Request data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ThrottleError::RuleNotFound(_) => "RULE_NOT_FOUND",
            ThrottleError::Config(_) => "CONFIG_ERROR",
            ThrottleError::Storage(_) => "STORAGE_ERROR",
            ThrottleError::Serialization(_) => "SERIALIZATION_ERROR",
            ThrottleError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for throttling operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
