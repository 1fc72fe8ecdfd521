//! Error types for data source adapters

#![allow(unexpected_cfgs)]

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`DataSource`](super::DataSource) adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The backing store cannot be reached
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// A read or aggregate query failed
    #[error("Query error: {0}")]
    Query(String),

    /// A call exceeded the caller-supplied timeout
    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Table or column does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A value could not be converted to the expected type
    #[error("Type mismatch on {column}: {message}")]
    TypeMismatch { column: String, message: String },

    /// A table write did not complete
    #[error("Write error: {0}")]
    Write(String),
}

/// Result type for adapter operations
pub type SourceResult<T> = Result<T, SourceError>;

impl SourceError {
    pub fn type_mismatch(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether the whole source is unreachable rather than one request failing
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            SourceError::Unavailable(msg) => format!(
                "Cannot reach the data source: {msg}\n\n\
                Hint: Check the [source] section of your configuration and that the database is running."
            ),
            SourceError::Timeout(limit) => format!(
                "A query ran longer than {}s.\n\n\
                Hint: Raise query_timeout_secs or lower max_concurrency.",
                limit.as_secs()
            ),
            SourceError::NotFound(what) => format!(
                "Not found: {what}\n\nHint: Run 'obscura run' to rebuild the snapshot tables."
            ),
            _ => self.to_string(),
        }
    }
}

#[cfg(feature = "duckdb-backend")]
impl From<duckdb::Error> for SourceError {
    fn from(err: duckdb::Error) -> Self {
        SourceError::Query(err.to_string())
    }
}

#[cfg(feature = "postgres-backend")]
impl From<tokio_postgres::Error> for SourceError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            SourceError::Unavailable(err.to_string())
        } else {
            SourceError::Query(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hints() {
        let err = SourceError::Unavailable("connection refused".to_string());
        assert!(err.is_unavailable());
        assert!(err.user_message().contains("Hint"));

        let err = SourceError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Timed out after 30000ms");
        assert!(err.user_message().contains("30s"));
    }
}
