//! Error types for sluice-connect
//!
//! Configuration problems (bad config, malformed prior state, a state type the
//! configuration does not expect) are kept apart from system failures so the
//! host can report them with the right failure type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Errors that can occur in connector operations
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Configuration validation failed
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to the database failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Checkpoint state is inconsistent
    #[error("state error: {0}")]
    State(String),

    /// A row could not be turned into a record
    #[error("data error: {0}")]
    Data(String),

    /// Error from the database layer
    #[error(transparent)]
    Rdbc(#[from] sluice_rdbc::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Failure classification reported in trace messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// The user must fix configuration or prior state
    ConfigError,
    /// Anything else
    SystemError,
}

impl ConnectorError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// How a host should classify this failure
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => FailureType::ConfigError,
            Self::Rdbc(e) if e.category() == sluice_rdbc::error::ErrorCategory::Configuration => {
                FailureType::ConfigError
            }
            _ => FailureType::SystemError,
        }
    }

    /// Check if re-running the whole invocation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Rdbc(e) => e.is_retriable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_type() {
        assert_eq!(
            ConnectorError::config("bad").failure_type(),
            FailureType::ConfigError
        );
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            ConnectorError::from(json_err).failure_type(),
            FailureType::ConfigError
        );
        assert_eq!(
            ConnectorError::from(sluice_rdbc::Error::driver("08006", 0, "gone")).failure_type(),
            FailureType::SystemError
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ConnectorError::connection("refused").is_retryable());
        assert!(ConnectorError::from(sluice_rdbc::Error::timeout("slow")).is_retryable());
        assert!(!ConnectorError::state("regressed").is_retryable());
    }

    #[test]
    fn test_rdbc_error_is_transparent() {
        let err = ConnectorError::from(sluice_rdbc::Error::config("missing url"));
        assert_eq!(err.to_string(), "configuration error: missing url");
        assert_eq!(err.failure_type(), FailureType::ConfigError);
    }
}
