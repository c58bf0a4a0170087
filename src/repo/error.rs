//! Error types for repository operations

use std::fmt;

/// Result type alias for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors that can occur during repository operations
#[derive(Debug)]
pub enum RepoError {
    /// Backend connection failed
    ConnectionFailed(String),

    /// Query failed
    QueryFailed(String),

    /// Migration failed
    MigrationFailed(String),

    /// Entity not found
    NotFound(String),

    /// Unique constraint violated (duplicate link pair, duplicate id)
    Conflict(String),

    /// Record (de)serialization error
    SerializationError(String),

    /// I/O error (file access, etc.)
    IoError(std::io::Error),
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to storage backend: {}", msg)
            }
            RepoError::QueryFailed(msg) => write!(f, "repository query failed: {}", msg),
            RepoError::MigrationFailed(msg) => write!(f, "database migration failed: {}", msg),
            RepoError::NotFound(what) => write!(f, "not found: {}", what),
            RepoError::Conflict(msg) => write!(f, "conflict: {}", msg),
            RepoError::SerializationError(msg) => {
                write!(f, "record serialization error: {}", msg)
            }
            RepoError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for RepoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepoError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RepoError {
    fn from(err: std::io::Error) -> Self {
        RepoError::IoError(err)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        RepoError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => RepoError::IoError(io_err),
            sqlx::Error::RowNotFound => RepoError::NotFound("no rows found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepoError::Conflict(db.to_string())
            }
            _ => RepoError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for RepoError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        RepoError::MigrationFailed(err.to_string())
    }
}
