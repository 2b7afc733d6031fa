//! Error types for the broker

use thiserror::Error;

use crate::query::QueryError;

/// Main error type for the broker
#[derive(Error, Debug)]
pub enum Error {
    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Cluster state error
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the coordination repository and the services on top of it
#[derive(Error, Debug)]
pub enum StateError {
    /// Key is absent from the repository
    #[error("Key not exist: {0}")]
    NotExist(String),

    /// Repository call did not complete within its deadline
    #[error("Repository timeout after {timeout_ms}ms on {key}")]
    Timeout {
        /// Key being accessed
        key: String,
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// Repository backend failure
    #[error("Repository error: {0}")]
    Repository(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StateError {
    /// Whether this error reports a missing key
    pub fn is_not_exist(&self) -> bool {
        matches!(self, StateError::NotExist(_))
    }
}

/// Validation errors for configuration input
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
