//! Error types for the taglog engine.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for logger operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// A query's attribute filter had the wrong shape
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The backing store reported a failure (surfaced, never retried here)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A record failed to encode or decode
    #[error("codec error: {0}")]
    Codec(String),

    /// An archival callback failed during an expiration sweep
    #[error("archive failed: {0}")]
    Archive(String),

    /// Live-tail subscription misuse (e.g. listening before subscribing)
    #[error("subscription error: {0}")]
    Subscribe(String),
}

impl From<serde_json::Error> for LogError {
    fn from(err: serde_json::Error) -> Self {
        LogError::Codec(err.to_string())
    }
}

/// Result type alias using [`LogError`].
pub type LogResult<T> = Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LogError::InvalidFilter("two pairs".to_string());
        assert_eq!(format!("{}", err), "invalid filter: two pairs");
    }

    #[test]
    fn test_error_from_store() {
        let store_err = StoreError::connection("refused");
        let err: LogError = store_err.into();
        assert!(matches!(err, LogError::Store(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let json_err = serde_json::from_str::<u64>("not a number").unwrap_err();
        let err: LogError = json_err.into();
        assert!(matches!(err, LogError::Codec(_)));
    }
}
