//! Storage error types.

use thiserror::Error;

/// Errors from storage backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// I/O failure in the backend
    ///
    /// The operation had no effect. Retrying may succeed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A stored key is not a valid record key
    ///
    /// Written by something other than this node; the record is ignored.
    #[error("unrecognised storage key: {0}")]
    InvalidKey(String),
}
