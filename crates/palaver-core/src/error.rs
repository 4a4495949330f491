//! Error types for the session state machine.
//!
//! These errors describe protocol violations by the peer. They are not
//! propagated through `Result` chains: the session converts them into
//! `error` frames (and, where the violation is fatal, a close action), so
//! the taxonomy here is what clients see in `error.reason`.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Protocol violations detected by the session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A frame kind arrived that is not valid in the current state.
    ///
    /// Fatal while `Unregistered` (the first frame must be a registration),
    /// non-fatal while `Active`.
    #[error("unexpected '{kind}' frame in state {state:?}")]
    UnexpectedFrame {
        /// State the session was in when the frame arrived.
        state: SessionState,
        /// Wire name of the offending frame kind.
        kind: &'static str,
    },

    /// A required field was empty after trimming whitespace.
    #[error("{field} cannot be empty")]
    EmptyField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// An inbound line could not be decoded.
    ///
    /// Fatal while `Unregistered`, non-fatal while `Active`.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// No inbound frame arrived within the inactivity window.
    #[error("timed out after {elapsed:?} of inactivity")]
    IdleTimeout {
        /// How long the session was idle.
        elapsed: Duration,
    },
}
