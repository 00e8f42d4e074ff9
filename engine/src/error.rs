//! Error types for the offline queue.

use crate::ActionKind;
use thiserror::Error;

/// Errors reported by a [`KeyValueStorage`](crate::KeyValueStorage) backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("i/o error on key '{key}': {message}")]
    Io { key: String, message: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Wrap an I/O error that happened while touching `key`.
    pub fn io(key: &str, err: std::io::Error) -> Self {
        StorageError::Io {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

/// All possible errors from the queue core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serialization failed: {0}")]
    Serialization(String),

    // Validation errors
    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: ActionKind, reason: String },

    #[error("unknown action type: {0}")]
    UnknownAction(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, Error>;
