//! Error types for frame encoding and decoding.
//!
//! Decode errors carry the serde diagnostic as a string: the relay reports
//! the reason back to the peer inside an `error` frame, so the message must
//! be `Display`-able and free of internal types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A line could not be parsed as a known frame.
    #[error("malformed frame: {0}")]
    Decode(String),

    /// A frame could not be serialized for the wire.
    ///
    /// This indicates a bug (all frame types serialize cleanly) and is
    /// surfaced rather than panicking so the session can be torn down.
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// An inbound line exceeded the frame size limit.
    #[error("frame too large: {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Size of the rejected line in bytes.
        size: usize,
        /// Maximum accepted line length.
        max: usize,
    },
}
