//! Storage error type.

use thiserror::Error;

/// Errors from the directory and history backends.
///
/// The relay never aborts a session over these: callers degrade (empty
/// history, "name unknown") and log. The variants exist so logs can tell a
/// backend fault from a serialization bug.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backing store failed (I/O, transaction, table access).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be serialized or deserialized.
    #[error("record serialization error: {0}")]
    Serialization(String),
}
