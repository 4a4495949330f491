//! Frame definitions and the line codec.
//!
//! Each frame is a single JSON object with a `"type"` discriminator in
//! `snake_case`. The discriminator is part of the serialized form (serde's
//! internally-tagged representation), so the wire stays self-describing and
//! clients can dispatch on `"type"` without knowing the full schema.
//!
//! # Invariants
//!
//! - Round-trip: encoding a frame and decoding the result yields an equal
//!   value.
//! - One line, one frame: encoded frames never contain `\n`.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Maximum accepted length of a single encoded frame, in bytes.
///
/// Transports reject longer lines before attempting to decode them, which
/// bounds per-connection memory regardless of peer behavior.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// One persisted chat message, as stored and as replayed in `history`
/// frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Sender display name.
    pub from: String,
    /// Receiver display name.
    pub to: String,
    /// Message body.
    pub content: String,
    /// Unix timestamp in milliseconds, assigned once at routing time.
    pub timestamp: u64,
}

/// Frames sent by clients to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Claim a display name. Must be the first frame on a connection.
    Register {
        /// Requested display name.
        username: String,
    },

    /// Route a message to a named, currently-connected receiver.
    Send {
        /// Receiver display name.
        receiver: String,
        /// Message body.
        content: String,
    },

    /// Request the current roster.
    ListUsers,

    /// Request persisted history for one conversation pair.
    GetHistory {
        /// The other participant.
        with: String,
    },

    /// Keepalive probe. Answered with [`ServerFrame::Pong`], never mutates
    /// state.
    Ping,
}

impl ClientFrame {
    /// Decode one line into a client frame.
    pub fn decode(line: &str) -> Result<Self> {
        decode_checked(line)
    }

    /// Encode this frame as a single JSON line (no trailing newline).
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Short name of the frame kind, for diagnostics and error frames.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Send { .. } => "send",
            Self::ListUsers => "list_users",
            Self::GetHistory { .. } => "get_history",
            Self::Ping => "ping",
        }
    }
}

/// Frames sent by the relay to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Registration acknowledgment.
    Registered {
        /// The accepted display name.
        username: String,
    },

    /// A routed message, pushed to the receiver and echoed to the sender as
    /// delivery confirmation. Both copies carry the same timestamp.
    Delivered {
        /// Sender display name.
        from: String,
        /// Receiver display name.
        to: String,
        /// Message body.
        content: String,
        /// Unix timestamp in milliseconds, assigned at routing time.
        timestamp: u64,
    },

    /// The current set of registered display names, pushed on every registry
    /// change and in reply to `list_users`. Sorted for deterministic output.
    Roster {
        /// Registered display names.
        users: Vec<String>,
    },

    /// Persisted history for one conversation pair, in append order.
    History {
        /// The other participant, from the target session's point of view.
        with: String,
        /// Messages exchanged between the pair, oldest first.
        messages: Vec<StoredMessage>,
    },

    /// Keepalive reply.
    Pong,

    /// Any rejected or malformed request.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}

impl ServerFrame {
    /// Decode one line into a server frame.
    ///
    /// Used by the client side of the protocol (and by tests acting as
    /// clients); the relay itself only encodes server frames.
    pub fn decode(line: &str) -> Result<Self> {
        decode_checked(line)
    }

    /// Encode this frame as a single JSON line (no trailing newline).
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Build an `error` frame from any displayable reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error { reason: reason.into() }
    }
}

fn decode_checked<T: serde::de::DeserializeOwned>(line: &str) -> Result<T> {
    let line = line.trim_end();

    if line.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge { size: line.len(), max: MAX_FRAME_LEN });
    }

    serde_json::from_str(line).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_uses_snake_case_tag() {
        let frame = ClientFrame::Register { username: "alice".to_string() };
        let line = frame.encode().unwrap();

        assert_eq!(line, r#"{"type":"register","username":"alice"}"#);
        assert_eq!(ClientFrame::decode(&line).unwrap(), frame);
    }

    #[test]
    fn unit_variants_decode_from_bare_tag() {
        assert_eq!(ClientFrame::decode(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
        assert_eq!(ClientFrame::decode(r#"{"type":"list_users"}"#).unwrap(), ClientFrame::ListUsers);
        assert_eq!(ServerFrame::decode(r#"{"type":"pong"}"#).unwrap(), ServerFrame::Pong);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = ClientFrame::decode(r#"{"type":"shout","content":"HI"}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn missing_field_is_rejected() {
        let result = ClientFrame::decode(r#"{"type":"send","receiver":"bob"}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn non_json_line_is_rejected() {
        assert!(matches!(ClientFrame::decode("hello there"), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn oversized_line_is_rejected_before_parsing() {
        let line = format!(r#"{{"type":"send","receiver":"bob","content":"{}"}}"#, "x".repeat(MAX_FRAME_LEN));

        match ClientFrame::decode(&line) {
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                assert_eq!(size, line.len());
                assert_eq!(max, MAX_FRAME_LEN);
            },
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn trailing_newline_is_tolerated() {
        let frame = ClientFrame::decode("{\"type\":\"ping\"}\n").unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn delivered_round_trip_preserves_timestamp() {
        let frame = ServerFrame::Delivered {
            from: "alice".to_string(),
            to: "bob".to_string(),
            content: "hi".to_string(),
            timestamp: 1_700_000_000_123,
        };

        let decoded = ServerFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn history_carries_messages_in_order() {
        let frame = ServerFrame::History {
            with: "bob".to_string(),
            messages: vec![
                StoredMessage {
                    from: "alice".to_string(),
                    to: "bob".to_string(),
                    content: "first".to_string(),
                    timestamp: 1,
                },
                StoredMessage {
                    from: "bob".to_string(),
                    to: "alice".to_string(),
                    content: "second".to_string(),
                    timestamp: 2,
                },
            ],
        };

        let line = frame.encode().unwrap();
        assert!(!line.contains('\n'));

        match ServerFrame::decode(&line).unwrap() {
            ServerFrame::History { messages, .. } => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[0].content, "first");
                assert_eq!(messages[1].content, "second");
            },
            other => panic!("expected History, got {other:?}"),
        }
    }

    #[test]
    fn error_helper_builds_error_frame() {
        let frame = ServerFrame::error("no such user");
        assert_eq!(frame, ServerFrame::Error { reason: "no such user".to_string() });
    }

    #[test]
    fn frame_kind_names_match_wire_tags() {
        assert_eq!(ClientFrame::Ping.kind(), "ping");
        assert_eq!(ClientFrame::Register { username: String::new() }.kind(), "register");
        assert_eq!(
            ClientFrame::Send { receiver: String::new(), content: String::new() }.kind(),
            "send"
        );
    }
}
