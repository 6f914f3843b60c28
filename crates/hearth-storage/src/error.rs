//! Error types for the storage crate.

use hearth_core::StorageError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the domain stores.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic write conflict: the record changed between read and write.
    #[error("Write conflict on {0}: expected version {1}")]
    Conflict(String, u64),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Underlying backend error.
    #[error("Backend error: {0}")]
    Backend(#[from] StorageError),
}

impl Error {
    /// Whether this error represents a retryable write conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(..))
    }

    /// Whether this error means the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
