//! Per-connection protocol state machine.
//!
//! Drives one client's lifecycle through `Unregistered → Active → Closed`.
//! Uses the action pattern: methods take time as input and return actions
//! for the driver to execute. This keeps the state machine pure (no I/O)
//! and makes testing straightforward.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐  register accepted   ┌────────┐
//! │ Unregistered │─────────────────────>│ Active │
//! └──────────────┘                      └────────┘
//!        │                                   │
//!        │ any other frame / timeout         │ disconnect / timeout
//!        │ / rejected registration           │
//!        ↓                                   ↓
//!   ┌────────┐                          ┌────────┐
//!   │ Closed │<─────────────────────────│ Closed │
//!   └────────┘                          └────────┘
//! ```
//!
//! The session only decides *what* should happen; looking up the recipient,
//! touching the registry, and reading history are the driver's job. That is
//! why registration and routing surface as intents ([`SessionAction::Register`],
//! [`SessionAction::Route`], ...) rather than being resolved here.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use palaver_proto::{ClientFrame, ServerFrame};

use crate::error::SessionError;

/// Maximum time allowed without any inbound frame before the session is
/// closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(220);

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no display name claimed yet. Only `register` is accepted.
    Unregistered,
    /// Registered under a display name; full request set accepted.
    Active,
    /// Terminal. Inbound frames are ignored.
    Closed,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle timeout before disconnecting
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { idle_timeout: DEFAULT_IDLE_TIMEOUT }
    }
}

/// Actions returned by the session state machine.
///
/// `Reply` and `Close` are self-contained; the remaining variants are
/// intents that need the shared registry or history store and are resolved
/// by the relay driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send this frame to the session's own peer.
    Reply(ServerFrame),

    /// The peer requested registration under this (trimmed) name.
    Register {
        /// Requested display name.
        username: String,
    },

    /// The peer asked to route a message.
    Route {
        /// Receiver display name (trimmed).
        receiver: String,
        /// Message body (trimmed).
        content: String,
    },

    /// The peer asked for the current roster.
    ListRoster,

    /// The peer asked for history with one other participant.
    FetchHistory {
        /// The other participant (trimmed).
        with: String,
    },

    /// Close the connection with this reason.
    Close {
        /// Reason for closing the connection.
        reason: String,
    },
}

/// Per-connection protocol state machine.
///
/// Pure: no I/O, no clock. Time is passed as a parameter to methods that
/// need it. Generic over `Instant` to support both real time and virtual
/// time for deterministic testing.
#[derive(Debug, Clone)]
pub struct Session<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Current state
    state: SessionState,
    /// Configuration
    config: SessionConfig,
    /// Display name, set when the session becomes Active
    display_name: Option<String>,
    /// Last inbound-traffic timestamp
    last_activity: I,
}

impl<I> Session<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new session in [`SessionState::Unregistered`] state.
    pub fn new(now: I, config: SessionConfig) -> Self {
        Self { state: SessionState::Unregistered, config, display_name: None, last_activity: now }
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Display name claimed by this session. `None` until Active.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Mark the session Active under `name`.
    ///
    /// Called by the driver after the registry accepted the registration.
    pub fn activate(&mut self, name: String) {
        debug_assert_eq!(self.state, SessionState::Unregistered);

        self.display_name = Some(name);
        self.state = SessionState::Active;
    }

    /// Mark the session as closed.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Process an inbound frame and return the actions it produces.
    ///
    /// Protocol violations do not surface as `Err`: per the protocol they
    /// become `error` replies (fatal before registration, tolerated after),
    /// which are themselves actions.
    pub fn handle_frame(&mut self, frame: ClientFrame, now: I) -> Vec<SessionAction> {
        self.last_activity = now;

        match (self.state, frame) {
            // Transport teardown is already in progress; nothing to do.
            (SessionState::Closed, _) => vec![],

            (SessionState::Unregistered, ClientFrame::Register { username }) => {
                let name = username.trim().to_string();
                if name.is_empty() {
                    return self.fail_fatal(&SessionError::EmptyField { field: "username" });
                }

                vec![SessionAction::Register { username: name }]
            },

            // The first frame must be a registration.
            (SessionState::Unregistered, other) => self.fail_fatal(&SessionError::UnexpectedFrame {
                state: SessionState::Unregistered,
                kind: other.kind(),
            }),

            (SessionState::Active, ClientFrame::Register { .. }) => {
                reply_error(&SessionError::UnexpectedFrame {
                    state: SessionState::Active,
                    kind: "register",
                })
            },

            (SessionState::Active, ClientFrame::Send { receiver, content }) => {
                let receiver = receiver.trim().to_string();
                let content = content.trim().to_string();

                if receiver.is_empty() {
                    return reply_error(&SessionError::EmptyField { field: "receiver" });
                }
                if content.is_empty() {
                    return reply_error(&SessionError::EmptyField { field: "content" });
                }

                vec![SessionAction::Route { receiver, content }]
            },

            (SessionState::Active, ClientFrame::ListUsers) => vec![SessionAction::ListRoster],

            (SessionState::Active, ClientFrame::GetHistory { with }) => {
                let with = with.trim().to_string();
                if with.is_empty() {
                    return reply_error(&SessionError::EmptyField { field: "with" });
                }

                vec![SessionAction::FetchHistory { with }]
            },

            (SessionState::Active, ClientFrame::Ping) => {
                vec![SessionAction::Reply(ServerFrame::Pong)]
            },
        }
    }

    /// Process an inbound line that failed to decode.
    ///
    /// Counts as activity. Fatal before registration, tolerated after.
    pub fn handle_invalid_frame(&mut self, detail: &str, now: I) -> Vec<SessionAction> {
        self.last_activity = now;

        let err = SessionError::Malformed(detail.to_string());
        match self.state {
            SessionState::Closed => vec![],
            SessionState::Unregistered => self.fail_fatal(&err),
            SessionState::Active => reply_error(&err),
        }
    }

    /// Elapsed time since last activity, if the idle window is exceeded.
    /// `None` otherwise or once closed.
    #[must_use]
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        if self.state == SessionState::Closed {
            return None;
        }

        let elapsed = now - self.last_activity;
        if elapsed > self.config.idle_timeout { Some(elapsed) } else { None }
    }

    /// Process periodic maintenance.
    ///
    /// On timeout the peer is told why before the close: the error reply is
    /// emitted ahead of the close action, matching the best-effort notify
    /// required by the protocol.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        let Some(elapsed) = self.check_timeout(now) else {
            return vec![];
        };

        let err = SessionError::IdleTimeout { elapsed };
        self.state = SessionState::Closed;

        vec![
            SessionAction::Reply(ServerFrame::error(err.to_string())),
            SessionAction::Close { reason: err.to_string() },
        ]
    }

    /// Close the session over a protocol violation: error reply, then close.
    fn fail_fatal(&mut self, err: &SessionError) -> Vec<SessionAction> {
        self.state = SessionState::Closed;

        vec![
            SessionAction::Reply(ServerFrame::error(err.to_string())),
            SessionAction::Close { reason: err.to_string() },
        ]
    }
}

/// Non-fatal violation: a single `error` reply, state unchanged.
fn reply_error(err: &SessionError) -> Vec<SessionAction> {
    vec![SessionAction::Reply(ServerFrame::error(err.to_string()))]
}
