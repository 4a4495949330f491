//! History replay toward live sessions.
//!
//! A freshly registered user receives one `history` frame per other online
//! user, so a reconnecting client sees every conversation it can currently
//! continue. After each routed message both participants get their shared
//! pair replayed, and an explicit `get_history` request replays one pair to
//! the requester only.
//!
//! Store failures never propagate: the target still receives a `history`
//! frame (empty), and the failure is surfaced as a warn-level log action.

use palaver_proto::ServerFrame;

use crate::{
    driver::{LogLevel, RelayAction},
    registry::ConnectionRegistry,
    storage::HistoryStore,
};

/// Pushes persisted conversation history to sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct HistoryReplayer;

impl HistoryReplayer {
    /// Create a new replayer.
    pub fn new() -> Self {
        Self
    }

    /// Push the history of one pair to one target session.
    ///
    /// `target_name` is the target's own display name; `with` is the other
    /// participant, which becomes the frame's `with` field.
    pub fn replay_pair<H: HistoryStore>(
        &self,
        history: &H,
        target_session: u64,
        target_name: &str,
        with: &str,
        actions: &mut Vec<RelayAction>,
    ) {
        let messages = match history.query(target_name, with) {
            Ok(messages) => messages,
            Err(e) => {
                actions.push(RelayAction::Log {
                    level: LogLevel::Warn,
                    message: format!(
                        "history query failed for ({target_name}, {with}): {e}; replaying empty"
                    ),
                });
                Vec::new()
            },
        };

        actions.push(RelayAction::SendToSession {
            session_id: target_session,
            frame: ServerFrame::History { with: with.to_string(), messages },
        });
    }

    /// Push histories with every other online user to a newly active
    /// session.
    pub fn replay_all<H: HistoryStore>(
        &self,
        registry: &ConnectionRegistry,
        history: &H,
        name: &str,
        session_id: u64,
        actions: &mut Vec<RelayAction>,
    ) {
        for other in registry.snapshot() {
            if other != name {
                self.replay_pair(history, session_id, name, &other, actions);
            }
        }
    }
}
