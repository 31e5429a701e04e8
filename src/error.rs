//! Error types for db-layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Provider-selection failures, lifecycle misuse and native driver failures are kept
//! as distinct variants so callers can tell "unknown provider" apart from
//! "known but not implemented" and from errors raised inside the driver itself.

use crate::models::ProviderKind;
use thiserror::Error;

/// Boxed native driver error, preserved unchanged as the error source.
pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Undefined provider: '{value}' is not a member of the provider enumeration")]
    UndefinedProvider { value: String },

    #[error("Provider {provider} is not implemented")]
    UnsupportedProvider { provider: ProviderKind },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Driver error ({provider}): {message}")]
    Driver {
        provider: ProviderKind,
        message: String,
        /// e.g., "42000" for a syntax error on SQL Server
        sql_state: Option<String>,
        #[source]
        source: BoxDynError,
    },

    #[error("No native driver installed for {provider}: {hint}")]
    DriverNotInstalled { provider: ProviderKind, hint: String },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },
}

impl DbError {
    /// Create an undefined provider error for a raw selector value.
    pub fn undefined_provider(value: impl ToString) -> Self {
        Self::UndefinedProvider {
            value: value.to_string(),
        }
    }

    /// Create an unsupported provider error.
    pub fn unsupported_provider(provider: ProviderKind) -> Self {
        Self::UnsupportedProvider { provider }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wrap a native driver error, keeping it as the source.
    pub fn driver(provider: ProviderKind, source: impl Into<BoxDynError>) -> Self {
        let source = source.into();
        Self::Driver {
            provider,
            message: source.to_string(),
            sql_state: None,
            source,
        }
    }

    /// Wrap a native driver error that carries a SQLSTATE / server error code.
    pub fn driver_with_state(
        provider: ProviderKind,
        sql_state: Option<String>,
        source: impl Into<BoxDynError>,
    ) -> Self {
        let source = source.into();
        Self::Driver {
            provider,
            message: source.to_string(),
            sql_state,
            source,
        }
    }

    /// Create a driver-not-installed error.
    pub fn driver_not_installed(provider: ProviderKind, hint: impl Into<String>) -> Self {
        Self::DriverNotInstalled {
            provider,
            hint: hint.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::UndefinedProvider { .. } => {
                Some("Use one of: sqlserver, oledb, odbc (or their numeric values 0, 1, 2)")
            }
            Self::UnsupportedProvider { .. } => {
                Some("Choose a supported provider: SQL Server, OLE DB or ODBC")
            }
            Self::DriverNotInstalled { hint, .. } => Some(hint),
            Self::Timeout { .. } => {
                Some("Consider increasing the timeout or optimizing the operation")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// SQLSTATE or server error code reported by the native driver.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Driver { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = DbError::undefined_provider(1000);
        assert!(err.to_string().contains("'1000'"));

        let err = DbError::unsupported_provider(ProviderKind::Oracle);
        assert!(err.to_string().contains("Oracle"));
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn test_driver_error_keeps_source() {
        let native = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = DbError::driver(ProviderKind::SqlServer, native);
        assert!(err.to_string().contains("refused"));
        let source = err.source().expect("driver error should keep its source");
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_driver_error_sql_state() {
        let err = DbError::driver_with_state(
            ProviderKind::Odbc,
            Some("42000".to_string()),
            "syntax error",
        );
        assert_eq!(err.sql_state(), Some("42000"));
        assert_eq!(DbError::invalid_argument("x").sql_state(), None);
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::driver_not_installed(ProviderKind::OleDb, "Install an OLE DB driver");
        assert_eq!(err.suggestion(), Some("Install an OLE DB driver"));
        assert!(DbError::invalid_operation("closed").suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(!DbError::invalid_argument("bad").is_retryable());
        assert!(!DbError::transaction("already active", "tx_1").is_retryable());
    }
}
