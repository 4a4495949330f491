//! Server error types.
//!
//! Strongly-typed errors for runtime operations: session bookkeeping,
//! storage access, frame codec failures, and transport faults. Every
//! variant is scoped to one session or one subsystem; none of them take the
//! whole relay down.

use std::fmt;

use crate::storage::StorageError;

/// Errors that can occur during server operations.
#[derive(Debug)]
pub enum ServerError {
    /// Session not found in the driver.
    ///
    /// A frame or close event referenced a session the driver does not
    /// know. Usually a race with a just-finished disconnect; harmless to
    /// drop.
    SessionNotFound(u64),

    /// Storage operation failed.
    ///
    /// Wraps errors from the directory or history backend. The relay
    /// degrades rather than dying; this surfaces where a caller needs the
    /// cause (e.g. failing to open the database at startup).
    Storage(StorageError),

    /// Frame encoding/decoding error.
    ///
    /// A server frame failed to serialize. Indicates a bug rather than bad
    /// peer input (peer input errors become `error` frames instead).
    Protocol(String),

    /// Transport-level failure (bind, accept, handshake).
    Transport(String),

    /// Invalid configuration (unparseable bind address, bad paths).
    Config(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "session not found: {id}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<palaver_proto::ProtocolError> for ServerError {
    fn from(err: palaver_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = ServerError::SessionNotFound(42);
        assert_eq!(err.to_string(), "session not found: 42");

        let err = ServerError::Transport("connection reset".to_string());
        assert_eq!(err.to_string(), "transport error: connection reset");

        let err = ServerError::Config("bad bind address".to_string());
        assert_eq!(err.to_string(), "config error: bad bind address");
    }

    #[test]
    fn storage_error_keeps_source() {
        use std::error::Error as _;

        let err = ServerError::from(StorageError::Backend("disk full".to_string()));
        assert!(err.source().is_some());
    }
}
