//! Storage error type.

use benchtop_core::OrchestratorError;

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Item already exists
    #[error("Already exists: {0}")]
    Conflict(String),

    /// The session pool has been closed
    #[error("session pool is closed")]
    PoolClosed,
}

impl From<StorageError> for OrchestratorError {
    fn from(err: StorageError) -> Self {
        OrchestratorError::Persistence(err.to_string())
    }
}
