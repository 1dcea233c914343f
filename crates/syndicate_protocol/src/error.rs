//! Error types for envelope encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON (de)serialization failed.
    #[error("envelope codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// An unknown auto-export code was encountered.
    #[error("invalid auto_export code: {0}")]
    InvalidAutoExport(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidAutoExport(7);
        assert_eq!(err.to_string(), "invalid auto_export code: 7");
    }
}
