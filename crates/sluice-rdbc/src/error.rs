//! Error types for sluice-rdbc
//!
//! Driver failures keep their SQLSTATE and vendor code so a check can print
//! them verbatim. Mapping failures name the column and declared type. Only
//! connection loss and timeouts count as retriable; a retry means re-running
//! the whole sync from the last checkpoint.

use std::fmt;
use thiserror::Error;

/// Result type for sluice-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by callers to pick a failure type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Could not reach or lost the database
    Connection,
    /// Statement rejected or failed mid-flight
    Query,
    /// Raised by the driver with SQLSTATE/vendor code
    Driver,
    /// A value did not fit the declared column type
    TypeConversion,
    /// Deadline expired
    Timeout,
    /// Bad connection parameters
    Configuration,
    /// Discovered metadata did not contain what was asked for
    Schema,
}

impl ErrorCategory {
    /// Connection and timeout failures may succeed on a later attempt
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Driver => "driver",
            Self::TypeConversion => "type_conversion",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::Schema => "schema",
        };
        f.write_str(label)
    }
}

/// Error raised by connections, metadata sessions and value mapping
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connecting failed or the link dropped
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Statement execution failed
    #[error("query error: {message}")]
    Query { message: String, sql: Option<String> },

    /// Error reported by the database driver
    #[error("driver error [{sql_state}/{vendor_code}]: {message}")]
    Driver {
        sql_state: String,
        vendor_code: i32,
        message: String,
    },

    /// A single value could not be converted
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// A column value could not be mapped to its portable representation
    #[error("cannot map column '{column}' declared as {declared_type}: {message}")]
    Data {
        column: String,
        declared_type: String,
        message: String,
    },

    /// Deadline expired
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Connection parameters rejected before reaching the database
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Column lookup for a table the database does not have
    #[error("table not found: {table}")]
    TableNotFound { table: String },
}

impl Error {
    /// Classification of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Driver { .. } => ErrorCategory::Driver,
            Self::TypeConversion { .. } | Self::Data { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::TableNotFound { .. } => ErrorCategory::Schema,
        }
    }

    /// Whether re-running the sync could succeed
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this error came straight from the database driver
    pub fn is_driver_error(&self) -> bool {
        matches!(self, Self::Driver { .. })
    }

    /// Connection failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Statement failure without the SQL text
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
        }
    }

    /// Statement failure carrying the offending SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Driver failure with SQLSTATE and vendor code
    pub fn driver(sql_state: impl Into<String>, vendor_code: i32, message: impl Into<String>) -> Self {
        Self::Driver {
            sql_state: sql_state.into(),
            vendor_code,
            message: message.into(),
        }
    }

    /// Expired deadline
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Rejected connection parameters
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Value that does not fit its target type
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Attach the column and declared type to a conversion failure
    pub fn data(column: impl Into<String>, declared_type: impl Into<String>, cause: &Error) -> Self {
        let message = match cause {
            Self::TypeConversion { message } => message.clone(),
            other => other.to_string(),
        };
        Self::Data {
            column: column.into(),
            declared_type: declared_type.into(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_failures_are_retriable() {
        assert!(Error::connection("reset by peer").is_retriable());
        assert!(Error::timeout("connect").is_retriable());

        assert!(!Error::driver("42501", 1142, "denied").is_retriable());
        assert!(!Error::type_conversion("bad").is_retriable());
        assert!(!Error::query("syntax").is_retriable());
        assert!(!Error::config("missing host").is_retriable());
    }

    #[test]
    fn test_driver_error_fields() {
        let err = Error::driver("42P01", 7, "relation \"orders\" does not exist");
        assert!(err.is_driver_error());
        assert_eq!(err.category(), ErrorCategory::Driver);
        assert!(err.to_string().contains("42P01"));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_data_error_wraps_conversion() {
        let cause = Error::type_conversion("expected integer, got 'abc'");
        let err = Error::data("amount", "INTEGER", &cause);

        assert_eq!(err.category(), ErrorCategory::TypeConversion);
        let text = err.to_string();
        assert!(text.contains("amount"));
        assert!(text.contains("INTEGER"));
        assert!(text.contains("expected integer"));
    }

    #[test]
    fn test_missing_table_is_a_schema_error() {
        let err = Error::TableNotFound {
            table: "sales.orders".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Schema);
        assert_eq!(err.category().to_string(), "schema");
    }
}
