//! Error types for the record store.

use thiserror::Error;

/// Result type for record operations.
pub type RecordResult<T> = Result<T, RecordError>;

/// Errors that can occur in record store operations.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The storage backend failed.
    #[error("record backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// A record failed to serialize or deserialize.
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecordError {
    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
