//! Core error types for IndexSync.

use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid or inconsistent schema model
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid value in a property
    #[error("Invalid value for {property}: {message}")]
    InvalidValue { property: String, message: String },
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}
