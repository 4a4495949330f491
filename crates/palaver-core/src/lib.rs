//! Transport-independent protocol logic for the Palaver chat relay.
//!
//! This crate holds the pieces of the relay that do no I/O:
//!
//! - [`session::Session`]: the per-connection protocol state machine
//!   (`Unregistered → Active → Closed`). Methods take the current time as a
//!   parameter and return [`session::SessionAction`]s for a driver to
//!   execute, keeping the state machine pure and directly testable.
//! - [`env::Environment`]: the abstraction over time and randomness that
//!   lets the same logic run against the system clock in production and a
//!   controlled clock in tests.
//!
//! Transport front ends (raw TCP lines, WebSocket text messages) live in
//! the server crate and only supply framing and connect/send/close
//! primitives; everything about registration, routing intent, keepalives,
//! and timeouts is decided here, once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod session;

pub use env::Environment;
pub use error::SessionError;
pub use session::{
    DEFAULT_IDLE_TIMEOUT, Session, SessionAction, SessionConfig, SessionState,
};
