//! Database error types.

use thiserror::Error;

/// Database-specific errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open or create database connection.
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Requested record was not found.
    #[error("record not found")]
    NotFound,

    /// Database record with provided identifier not found.
    #[error("{0}")]
    NotFoundWithMessage(String),

    /// Failed to decode database value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Underlying `SQLx` error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<DatabaseError> for prospector_core::ProspectorError {
    fn from(err: DatabaseError) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
