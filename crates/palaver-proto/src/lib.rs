//! Wire protocol for the Palaver chat relay.
//!
//! Palaver speaks a line-delimited JSON protocol: every frame is one JSON
//! object tagged by a `"type"` field, terminated by a newline on stream
//! transports and carried as one text message on WebSocket transports.
//!
//! The protocol is deliberately text-based so that any structured-text
//! client (including `nc` plus a JSON library) can participate. Frames are
//! split into [`ClientFrame`] (inbound requests) and [`ServerFrame`]
//! (outbound pushes and replies); the relay never echoes a client frame
//! verbatim, so the two directions share no variants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod frame;

pub use errors::{ProtocolError, Result};
pub use frame::{ClientFrame, MAX_FRAME_LEN, ServerFrame, StoredMessage};
