//! Point-to-point message routing.
//!
//! Resolves the receiver in the registry, builds the single `delivered`
//! frame shared by receiver and sender, and appends to the history store.
//! The timestamp is taken once by the caller and reused for both the wire
//! frame and the persisted record, so delivery and history order on the
//! same value.

use palaver_proto::{ServerFrame, StoredMessage};

use crate::{
    registry::ConnectionRegistry,
    storage::{HistoryStore, StorageError},
};

/// Result of one routing attempt.
#[derive(Debug)]
pub enum RouteOutcome {
    /// The receiver is connected; delivery frames are ready.
    Delivered {
        /// Session ID of the receiver.
        recipient_session: u64,
        /// The `delivered` frame, pushed to the receiver and echoed to the
        /// sender.
        frame: ServerFrame,
        /// Persistence failure, if the append did not land. Delivery still
        /// proceeds; the caller logs the loss.
        append_error: Option<StorageError>,
    },

    /// The receiver is not in the registry. Nothing was persisted.
    RecipientNotFound,
}

/// Looks up recipients and produces delivery frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageRouter;

impl MessageRouter {
    /// Create a new router.
    pub fn new() -> Self {
        Self
    }

    /// Route one message from `sender` to `receiver`.
    ///
    /// `timestamp` must come from the environment's wall clock, assigned
    /// once per routed message.
    pub fn route<H: HistoryStore>(
        &self,
        registry: &ConnectionRegistry,
        history: &H,
        sender: &str,
        receiver: &str,
        content: &str,
        timestamp: u64,
    ) -> RouteOutcome {
        let Some(recipient_session) = registry.lookup(receiver) else {
            return RouteOutcome::RecipientNotFound;
        };

        let message = StoredMessage {
            from: sender.to_string(),
            to: receiver.to_string(),
            content: content.to_string(),
            timestamp,
        };

        let append_error = history.append(&message).err();

        RouteOutcome::Delivered {
            recipient_session,
            frame: ServerFrame::Delivered {
                from: message.from,
                to: message.to,
                content: message.content,
                timestamp,
            },
            append_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryHistoryStore, MemoryUserDirectory};

    fn registry_with(names: &[(&str, u64)]) -> ConnectionRegistry {
        let directory = MemoryUserDirectory::new();
        let mut registry = ConnectionRegistry::new();
        for (name, session) in names {
            registry.register(name, *session, &directory).unwrap();
        }
        registry
    }

    #[test]
    fn route_to_connected_receiver_delivers_and_persists() {
        let registry = registry_with(&[("alice", 1), ("bob", 2)]);
        let history = MemoryHistoryStore::new();
        let router = MessageRouter::new();

        let outcome = router.route(&registry, &history, "alice", "bob", "hi", 42);

        match outcome {
            RouteOutcome::Delivered { recipient_session, frame, append_error } => {
                assert_eq!(recipient_session, 2);
                assert!(append_error.is_none());
                assert_eq!(frame, ServerFrame::Delivered {
                    from: "alice".to_string(),
                    to: "bob".to_string(),
                    content: "hi".to_string(),
                    timestamp: 42,
                });
            },
            RouteOutcome::RecipientNotFound => panic!("expected delivery"),
        }

        let stored = history.query("alice", "bob").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].timestamp, 42);
    }

    #[test]
    fn route_to_absent_receiver_persists_nothing() {
        let registry = registry_with(&[("alice", 1)]);
        let history = MemoryHistoryStore::new();
        let router = MessageRouter::new();

        let outcome = router.route(&registry, &history, "alice", "ghost", "hi", 42);

        assert!(matches!(outcome, RouteOutcome::RecipientNotFound));
        assert_eq!(history.message_count(), 0);
    }
}
