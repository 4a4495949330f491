//! Roster construction and fan-out.
//!
//! Builds `roster` frames from registry snapshots. Fan-out is best-effort:
//! the resulting broadcast action carries the target session ids resolved
//! at snapshot time, and the executor simply drops writes to peers that
//! disappeared in the meantime. A later broadcast corrects any roster a
//! racing join or leave made stale.

use palaver_proto::ServerFrame;

use crate::{
    driver::RelayAction,
    registry::ConnectionRegistry,
};

/// Pushes roster updates to active sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct PresenceBroadcaster;

impl PresenceBroadcaster {
    /// Create a new broadcaster.
    pub fn new() -> Self {
        Self
    }

    /// Roster push to every active session, for after a registry change.
    pub fn broadcast(&self, registry: &ConnectionRegistry) -> RelayAction {
        RelayAction::Broadcast {
            session_ids: registry.session_ids(),
            frame: ServerFrame::Roster { users: registry.snapshot() },
        }
    }

    /// Roster reply to a single session, for `list_users` requests.
    pub fn roster_reply(&self, registry: &ConnectionRegistry, session_id: u64) -> RelayAction {
        RelayAction::SendToSession {
            session_id,
            frame: ServerFrame::Roster { users: registry.snapshot() },
        }
    }
}
