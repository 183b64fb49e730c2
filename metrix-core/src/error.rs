//! Error types for metrix.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use crate::types::MetricKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for metrix operations.
pub type Result<T> = std::result::Result<T, MetrixError>;

/// Main error type for metrix.
#[derive(Error, Debug)]
pub enum MetrixError {
    // Lookup errors
    #[error("{kind} metric not found: {name}")]
    MetricNotFound { kind: MetricKind, name: String },

    // Client input errors
    #[error("Invalid metric {id:?}: {reason}")]
    InvalidMetric { id: String, reason: String },

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {reason}")]
    MigrationFailed { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot at {path:?} is unreadable: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // Envelope errors
    #[error("Body signature does not match")]
    SignatureMismatch,

    #[error("Compression failed: {reason}")]
    CompressionFailed { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MetrixError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// Create an InvalidMetric error.
    pub fn invalid(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMetric { id: id.into(), reason: reason.into() }
    }

    /// Whether the failure is transient and the operation may be attempted again.
    ///
    /// Driver and filesystem failures are retriable. A malformed DSN or a row that
    /// cannot be decoded will fail the same way every time, as will anything caused
    /// by the request itself.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Database(err) => !matches!(
                err,
                sqlx::Error::Configuration(_)
                    | sqlx::Error::RowNotFound
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::ColumnIndexOutOfBounds { .. }
                    | sqlx::Error::TypeNotFound { .. }
            ),
            Self::Io { .. } => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::MetricNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let io = MetrixError::Io {
            path: "/tmp/x".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(io.is_retriable());

        let pool = MetrixError::Database(sqlx::Error::PoolTimedOut);
        assert!(pool.is_retriable());

        let dsn = MetrixError::Database(sqlx::Error::Configuration("bad dsn".into()));
        assert!(!dsn.is_retriable());

        let missing = MetrixError::MetricNotFound { kind: MetricKind::Gauge, name: "x".into() };
        assert!(!missing.is_retriable());
        assert!(missing.is_not_found());

        assert!(!MetrixError::invalid("x", "no value").is_retriable());
    }
}
