//! Error types for the docflow-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// A persisted record contains a value the store cannot interpret
    /// (e.g. an unknown status string or a non-RFC 3339 timestamp).
    #[error("corrupt {field} in stored run {run_id}: {value}")]
    CorruptRecord {
        run_id: String,
        field: &'static str,
        value: String,
    },

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
