//! Relay driver.
//!
//! Ties together the per-connection session state machines, the
//! ConnectionRegistry, the MessageRouter, the PresenceBroadcaster, the
//! HistoryReplayer, and the persistence traits. The driver is sans-io: it
//! consumes [`RelayEvent`]s produced by the transport front ends and
//! returns [`RelayAction`]s for them to execute. The runtime owns exactly
//! one driver behind a mutex and feeds it one event at a time, which makes
//! every registry operation a single global critical section — two
//! concurrent registrations of the same name can never both observe it
//! free.

use std::collections::HashMap;

use palaver_core::{
    Environment,
    session::{Session, SessionAction, SessionConfig},
};
use palaver_proto::{ClientFrame, ServerFrame};

use crate::{
    presence::PresenceBroadcaster,
    registry::ConnectionRegistry,
    replay::HistoryReplayer,
    router::{MessageRouter, RouteOutcome},
    server_error::ServerError,
    storage::{HistoryStore, UserDirectory},
};

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Session configuration (idle timeout)
    pub session: SessionConfig,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { session: SessionConfig::default(), max_connections: 10_000 }
    }
}

/// Events that the relay driver processes.
///
/// These are produced by the transport front ends (TCP, WebSocket) or the
/// periodic ticker.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        session_id: u64,
    },

    /// A frame was received from a connection
    FrameReceived {
        /// Connection that sent the frame
        session_id: u64,
        /// The decoded frame
        frame: ClientFrame,
    },

    /// An inbound line could not be decoded
    FrameRejected {
        /// Connection that sent the line
        session_id: u64,
        /// Decode failure description
        reason: String,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Connection that was closed
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Periodic tick for timeout checking
    Tick,
}

/// Log levels for driver actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Actions that the relay driver produces.
///
/// Executed by runtime-specific code. Broadcast targets are resolved while
/// the driver is held, so the executor performs writes without touching the
/// registry — no socket write ever happens inside the registry critical
/// section.
#[derive(Debug, Clone)]
pub enum RelayAction {
    /// Send a frame to a specific session
    SendToSession {
        /// Target session ID
        session_id: u64,
        /// Frame to send
        frame: ServerFrame,
    },

    /// Send a frame to several sessions (best-effort fan-out)
    Broadcast {
        /// Target session IDs, resolved at snapshot time
        session_ids: Vec<u64>,
        /// Frame to send
        frame: ServerFrame,
    },

    /// Close a connection
    CloseConnection {
        /// Session to close
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (keeps the driver free of I/O)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Action-based relay driver.
///
/// Orchestrates session lifecycles, registration, routing, presence
/// broadcast, and history replay.
pub struct RelayDriver<E, D, H>
where
    E: Environment,
    D: UserDirectory,
    H: HistoryStore,
{
    /// Session state machines (session_id → Session)
    sessions: HashMap<u64, Session<E::Instant>>,
    /// Live username → session registry
    registry: ConnectionRegistry,
    /// Message routing
    router: MessageRouter,
    /// Roster broadcast
    presence: PresenceBroadcaster,
    /// History replay
    replayer: HistoryReplayer,
    /// Persisted display-name directory
    users: D,
    /// Persisted chat log
    history: H,
    /// Environment (time, RNG)
    env: E,
    /// Driver configuration
    config: DriverConfig,
}

impl<E, D, H> RelayDriver<E, D, H>
where
    E: Environment,
    D: UserDirectory,
    H: HistoryStore,
{
    /// Create a new relay driver.
    pub fn new(env: E, users: D, history: H, config: DriverConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            registry: ConnectionRegistry::new(),
            router: MessageRouter::new(),
            presence: PresenceBroadcaster::new(),
            replayer: HistoryReplayer::new(),
            users,
            history,
            env,
            config,
        }
    }

    /// Process a relay event and return actions to execute.
    ///
    /// This is the main entry point for the driver.
    pub fn process_event(&mut self, event: RelayEvent) -> Result<Vec<RelayAction>, ServerError> {
        match event {
            RelayEvent::ConnectionAccepted { session_id } => {
                self.handle_connection_accepted(session_id)
            },
            RelayEvent::FrameReceived { session_id, frame } => {
                self.handle_frame_received(session_id, frame)
            },
            RelayEvent::FrameRejected { session_id, reason } => {
                self.handle_frame_rejected(session_id, &reason)
            },
            RelayEvent::ConnectionClosed { session_id, reason } => {
                Ok(self.handle_connection_closed(session_id, &reason))
            },
            RelayEvent::Tick => Ok(self.handle_tick()),
        }
    }

    /// Handle a new connection being accepted.
    fn handle_connection_accepted(
        &mut self,
        session_id: u64,
    ) -> Result<Vec<RelayAction>, ServerError> {
        if self.sessions.len() >= self.config.max_connections {
            return Ok(vec![RelayAction::CloseConnection {
                session_id,
                reason: "max connections exceeded".to_string(),
            }]);
        }

        let session = Session::new(self.env.now(), self.config.session.clone());
        self.sessions.insert(session_id, session);

        Ok(vec![RelayAction::Log {
            level: LogLevel::Debug,
            message: format!("connection accepted, session_id={session_id}"),
        }])
    }

    /// Handle a frame received from a connection.
    fn handle_frame_received(
        &mut self,
        session_id: u64,
        frame: ClientFrame,
    ) -> Result<Vec<RelayAction>, ServerError> {
        let now = self.env.now();
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(ServerError::SessionNotFound(session_id))?;

        let commands = session.handle_frame(frame, now);
        Ok(self.apply_session_actions(session_id, commands))
    }

    /// Handle an undecodable line from a connection.
    fn handle_frame_rejected(
        &mut self,
        session_id: u64,
        reason: &str,
    ) -> Result<Vec<RelayAction>, ServerError> {
        let now = self.env.now();
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(ServerError::SessionNotFound(session_id))?;

        let commands = session.handle_invalid_frame(reason, now);
        Ok(self.apply_session_actions(session_id, commands))
    }

    /// Handle a connection being closed.
    ///
    /// The transport invokes this from its guaranteed cleanup path, so
    /// deregistration and the follow-up roster broadcast happen exactly
    /// once per session no matter how the connection died. Repeated close
    /// events for the same session are no-ops.
    fn handle_connection_closed(&mut self, session_id: u64, reason: &str) -> Vec<RelayAction> {
        let mut actions = Vec::new();

        let Some(mut session) = self.sessions.remove(&session_id) else {
            return actions;
        };
        session.close();

        if let Some(name) = session.display_name() {
            if self.registry.deregister(name) {
                actions.push(RelayAction::Log {
                    level: LogLevel::Info,
                    message: format!("'{name}' disconnected: {reason}"),
                });
                actions.push(self.presence.broadcast(&self.registry));
            }
        } else {
            actions.push(RelayAction::Log {
                level: LogLevel::Debug,
                message: format!("session {session_id} closed before registering: {reason}"),
            });
        }

        actions
    }

    /// Handle periodic tick for timeout checking.
    fn handle_tick(&mut self) -> Vec<RelayAction> {
        let now = self.env.now();
        let mut actions = Vec::new();

        let session_ids: Vec<u64> = self.sessions.keys().copied().collect();
        for session_id in session_ids {
            let commands = match self.sessions.get_mut(&session_id) {
                Some(session) => session.tick(now),
                None => continue,
            };

            if !commands.is_empty() {
                actions.extend(self.apply_session_actions(session_id, commands));
            }
        }

        actions
    }

    /// Resolve session intents into relay actions.
    fn apply_session_actions(
        &mut self,
        session_id: u64,
        commands: Vec<SessionAction>,
    ) -> Vec<RelayAction> {
        let mut actions = Vec::new();

        for command in commands {
            match command {
                SessionAction::Reply(frame) => {
                    actions.push(RelayAction::SendToSession { session_id, frame });
                },
                SessionAction::Close { reason } => {
                    actions.push(RelayAction::CloseConnection { session_id, reason });
                },
                SessionAction::Register { username } => {
                    self.handle_register(session_id, &username, &mut actions);
                },
                SessionAction::Route { receiver, content } => {
                    self.handle_route(session_id, &receiver, &content, &mut actions);
                },
                SessionAction::ListRoster => {
                    actions.push(self.presence.roster_reply(&self.registry, session_id));
                },
                SessionAction::FetchHistory { with } => {
                    if let Some(name) = self.display_name_of(session_id) {
                        self.replayer.replay_pair(
                            &self.history,
                            session_id,
                            &name,
                            &with,
                            &mut actions,
                        );
                    }
                },
            }
        }

        actions
    }

    /// Resolve a registration intent against the registry.
    fn handle_register(&mut self, session_id: u64, name: &str, actions: &mut Vec<RelayAction>) {
        match self.registry.register(name, session_id, &self.users) {
            Ok(()) => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.activate(name.to_string());
                }

                actions.push(RelayAction::SendToSession {
                    session_id,
                    frame: ServerFrame::Registered { username: name.to_string() },
                });
                actions.push(RelayAction::Log {
                    level: LogLevel::Info,
                    message: format!("'{name}' registered on session {session_id}"),
                });
                actions.push(self.presence.broadcast(&self.registry));
                self.replayer.replay_all(
                    &self.registry,
                    &self.history,
                    name,
                    session_id,
                    actions,
                );
            },
            Err(e) => {
                // Name conflicts are fatal for the attempting connection;
                // the session holding the name is untouched.
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.close();
                }

                actions.push(RelayAction::SendToSession {
                    session_id,
                    frame: ServerFrame::error(e.to_string()),
                });
                actions.push(RelayAction::CloseConnection {
                    session_id,
                    reason: e.to_string(),
                });
                actions.push(RelayAction::Log {
                    level: LogLevel::Warn,
                    message: format!("registration rejected on session {session_id}: {e}"),
                });
            },
        }
    }

    /// Resolve a routing intent: deliver, confirm, persist, refresh.
    fn handle_route(
        &mut self,
        session_id: u64,
        receiver: &str,
        content: &str,
        actions: &mut Vec<RelayAction>,
    ) {
        let Some(sender) = self.display_name_of(session_id) else {
            actions.push(RelayAction::Log {
                level: LogLevel::Error,
                message: format!("route from session {session_id} with no display name"),
            });
            return;
        };

        let timestamp = self.env.wall_clock_millis();

        match self.router.route(&self.registry, &self.history, &sender, receiver, content, timestamp)
        {
            RouteOutcome::Delivered { recipient_session, frame, append_error } => {
                actions.push(RelayAction::SendToSession {
                    session_id: recipient_session,
                    frame: frame.clone(),
                });
                actions.push(RelayAction::SendToSession { session_id, frame });

                if let Some(e) = append_error {
                    actions.push(RelayAction::Log {
                        level: LogLevel::Error,
                        message: format!(
                            "failed to persist message {sender} -> {receiver}: {e}; delivered anyway"
                        ),
                    });
                }

                // Refresh both participants' view of the shared history.
                self.replayer.replay_pair(
                    &self.history,
                    session_id,
                    &sender,
                    receiver,
                    actions,
                );
                self.replayer.replay_pair(
                    &self.history,
                    recipient_session,
                    receiver,
                    &sender,
                    actions,
                );
            },
            RouteOutcome::RecipientNotFound => {
                actions.push(RelayAction::SendToSession {
                    session_id,
                    frame: ServerFrame::error(format!("user '{receiver}' not found")),
                });
                actions.push(RelayAction::Log {
                    level: LogLevel::Debug,
                    message: format!("{sender} -> {receiver}: recipient not found"),
                });
            },
        }
    }

    fn display_name_of(&self, session_id: u64) -> Option<String> {
        self.sessions.get(&session_id).and_then(|s| s.display_name()).map(str::to_string)
    }

    /// Number of live connections (registered or not).
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Current sorted roster.
    pub fn roster(&self) -> Vec<String> {
        self.registry.snapshot()
    }

    /// Whether `name` is currently registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }
}

impl<E, D, H> std::fmt::Debug for RelayDriver<E, D, H>
where
    E: Environment,
    D: UserDirectory,
    H: HistoryStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayDriver")
            .field("connection_count", &self.sessions.len())
            .field("registered", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    };

    use palaver_proto::StoredMessage;

    use super::*;
    use crate::storage::{MemoryHistoryStore, MemoryUserDirectory, StorageError};

    /// Test environment with a steerable clock and deterministic wall time.
    #[derive(Clone)]
    struct TestEnv {
        now: Arc<Mutex<Instant>>,
        wall: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { now: Arc::new(Mutex::new(Instant::now())), wall: Arc::new(AtomicU64::new(1_000)) }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = i as u8;
            }
        }

        fn wall_clock_millis(&self) -> u64 {
            self.wall.fetch_add(1, Ordering::SeqCst)
        }
    }

    type TestDriver = RelayDriver<TestEnv, MemoryUserDirectory, MemoryHistoryStore>;

    fn driver() -> (TestDriver, TestEnv, MemoryHistoryStore) {
        let env = TestEnv::new();
        let history = MemoryHistoryStore::new();
        let driver = RelayDriver::new(
            env.clone(),
            MemoryUserDirectory::new(),
            history.clone(),
            DriverConfig::default(),
        );
        (driver, env, history)
    }

    fn connect_and_register(
        driver: &mut RelayDriver<TestEnv, MemoryUserDirectory, impl HistoryStore>,
        session_id: u64,
        name: &str,
    ) -> Vec<RelayAction> {
        driver.process_event(RelayEvent::ConnectionAccepted { session_id }).unwrap();
        driver
            .process_event(RelayEvent::FrameReceived {
                session_id,
                frame: ClientFrame::Register { username: name.to_string() },
            })
            .unwrap()
    }

    fn sends_to(actions: &[RelayAction], session_id: u64) -> Vec<ServerFrame> {
        actions
            .iter()
            .filter_map(|a| match a {
                RelayAction::SendToSession { session_id: id, frame } if *id == session_id => {
                    Some(frame.clone())
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn registration_acks_broadcasts_and_replays() {
        let (mut driver, _env, _history) = driver();
        connect_and_register(&mut driver, 1, "alice");

        let actions = connect_and_register(&mut driver, 2, "bob");

        let to_bob = sends_to(&actions, 2);
        assert_eq!(to_bob[0], ServerFrame::Registered { username: "bob".to_string() });
        // replay_all: one (empty) history frame for the one other user.
        assert!(
            to_bob
                .iter()
                .any(|f| matches!(f, ServerFrame::History { with, messages } if with == "alice" && messages.is_empty()))
        );

        // The roster broadcast reaches both registered sessions.
        let broadcast = actions.iter().find_map(|a| match a {
            RelayAction::Broadcast { session_ids, frame } => Some((session_ids.clone(), frame.clone())),
            _ => None,
        });
        let (mut ids, frame) = broadcast.expect("expected a roster broadcast");
        ids.sort_unstable();
        assert_eq!(ids, [1, 2]);
        assert_eq!(frame, ServerFrame::Roster {
            users: vec!["alice".to_string(), "bob".to_string()],
        });

        assert_eq!(driver.roster(), ["alice", "bob"]);
    }

    #[test]
    fn duplicate_name_is_rejected_and_first_session_unaffected() {
        let (mut driver, _env, _history) = driver();
        connect_and_register(&mut driver, 1, "alice");

        let actions = connect_and_register(&mut driver, 2, "alice");

        let to_second = sends_to(&actions, 2);
        assert!(matches!(&to_second[0], ServerFrame::Error { reason } if reason.contains("already in use")));
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, RelayAction::CloseConnection { session_id: 2, .. }))
        );

        // First session still registered and functional.
        assert_eq!(driver.roster(), ["alice"]);
        let pong = driver
            .process_event(RelayEvent::FrameReceived { session_id: 1, frame: ClientFrame::Ping })
            .unwrap();
        assert_eq!(sends_to(&pong, 1), [ServerFrame::Pong]);
    }

    #[test]
    fn send_delivers_confirms_persists_and_refreshes_both() {
        let (mut driver, _env, history) = driver();
        connect_and_register(&mut driver, 1, "alice");
        connect_and_register(&mut driver, 2, "bob");

        let actions = driver
            .process_event(RelayEvent::FrameReceived {
                session_id: 1,
                frame: ClientFrame::Send { receiver: "bob".to_string(), content: "hi".to_string() },
            })
            .unwrap();

        let to_bob = sends_to(&actions, 2);
        let to_alice = sends_to(&actions, 1);

        let delivered = ServerFrame::Delivered {
            from: "alice".to_string(),
            to: "bob".to_string(),
            content: "hi".to_string(),
            timestamp: 1_000,
        };
        assert_eq!(to_bob[0], delivered);
        assert_eq!(to_alice[0], delivered);

        // Both participants get their shared pair refreshed.
        assert!(matches!(&to_alice[1], ServerFrame::History { with, messages } if with == "bob" && messages.len() == 1));
        assert!(matches!(&to_bob[1], ServerFrame::History { with, messages } if with == "alice" && messages.len() == 1));

        let stored = history.query("alice", "bob").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].timestamp, 1_000);
    }

    #[test]
    fn send_to_unknown_user_informs_sender_and_persists_nothing() {
        let (mut driver, _env, history) = driver();
        connect_and_register(&mut driver, 1, "alice");

        let actions = driver
            .process_event(RelayEvent::FrameReceived {
                session_id: 1,
                frame: ClientFrame::Send {
                    receiver: "ghost".to_string(),
                    content: "hi".to_string(),
                },
            })
            .unwrap();

        let to_alice = sends_to(&actions, 1);
        assert!(matches!(&to_alice[0], ServerFrame::Error { reason } if reason.contains("ghost")));
        assert_eq!(history.message_count(), 0);
    }

    #[test]
    fn get_history_replays_to_requester_only() {
        let (mut driver, _env, history) = driver();
        connect_and_register(&mut driver, 1, "alice");
        connect_and_register(&mut driver, 2, "bob");
        history
            .append(&StoredMessage {
                from: "alice".to_string(),
                to: "bob".to_string(),
                content: "earlier".to_string(),
                timestamp: 5,
            })
            .unwrap();

        let actions = driver
            .process_event(RelayEvent::FrameReceived {
                session_id: 1,
                frame: ClientFrame::GetHistory { with: "bob".to_string() },
            })
            .unwrap();

        let to_alice = sends_to(&actions, 1);
        assert!(matches!(&to_alice[0], ServerFrame::History { with, messages } if with == "bob" && messages.len() == 1));
        assert!(sends_to(&actions, 2).is_empty());
    }

    #[test]
    fn list_users_replies_with_current_roster() {
        let (mut driver, _env, _history) = driver();
        connect_and_register(&mut driver, 1, "alice");
        connect_and_register(&mut driver, 2, "bob");

        let actions = driver
            .process_event(RelayEvent::FrameReceived { session_id: 2, frame: ClientFrame::ListUsers })
            .unwrap();

        assert_eq!(sends_to(&actions, 2), [ServerFrame::Roster {
            users: vec!["alice".to_string(), "bob".to_string()],
        }]);
    }

    #[test]
    fn close_deregisters_and_broadcasts_once() {
        let (mut driver, _env, _history) = driver();
        connect_and_register(&mut driver, 1, "alice");
        connect_and_register(&mut driver, 2, "bob");

        let actions = driver
            .process_event(RelayEvent::ConnectionClosed {
                session_id: 2,
                reason: "peer disconnected".to_string(),
            })
            .unwrap();

        let broadcasts: Vec<_> = actions
            .iter()
            .filter(|a| matches!(a, RelayAction::Broadcast { .. }))
            .collect();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(driver.roster(), ["alice"]);

        // Closing again is a no-op: no spurious broadcast.
        let repeat = driver
            .process_event(RelayEvent::ConnectionClosed {
                session_id: 2,
                reason: "duplicate close".to_string(),
            })
            .unwrap();
        assert!(repeat.iter().all(|a| !matches!(a, RelayAction::Broadcast { .. })));
    }

    #[test]
    fn name_is_reusable_after_close() {
        let (mut driver, _env, _history) = driver();
        connect_and_register(&mut driver, 1, "alice");
        driver
            .process_event(RelayEvent::ConnectionClosed {
                session_id: 1,
                reason: "gone".to_string(),
            })
            .unwrap();

        let actions = connect_and_register(&mut driver, 2, "alice");
        assert_eq!(
            sends_to(&actions, 2)[0],
            ServerFrame::Registered { username: "alice".to_string() }
        );
        assert_eq!(driver.roster(), ["alice"]);
    }

    #[test]
    fn unregistered_close_does_not_broadcast() {
        let (mut driver, _env, _history) = driver();
        driver.process_event(RelayEvent::ConnectionAccepted { session_id: 1 }).unwrap();

        let actions = driver
            .process_event(RelayEvent::ConnectionClosed {
                session_id: 1,
                reason: "gone".to_string(),
            })
            .unwrap();

        assert!(actions.iter().all(|a| !matches!(a, RelayAction::Broadcast { .. })));
    }

    #[test]
    fn tick_times_out_idle_sessions() {
        let (mut driver, env, _history) = driver();
        connect_and_register(&mut driver, 1, "alice");

        // Within the window: quiet.
        let actions = driver.process_event(RelayEvent::Tick).unwrap();
        assert!(actions.is_empty());

        env.advance(Duration::from_secs(221));
        let actions = driver.process_event(RelayEvent::Tick).unwrap();

        let to_alice = sends_to(&actions, 1);
        assert!(matches!(&to_alice[0], ServerFrame::Error { reason } if reason.contains("timed out")));
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, RelayAction::CloseConnection { session_id: 1, .. }))
        );
    }

    #[test]
    fn max_connections_is_enforced() {
        let env = TestEnv::new();
        let config = DriverConfig { max_connections: 1, ..Default::default() };
        let mut driver = RelayDriver::new(
            env,
            MemoryUserDirectory::new(),
            MemoryHistoryStore::new(),
            config,
        );

        driver.process_event(RelayEvent::ConnectionAccepted { session_id: 1 }).unwrap();
        let actions = driver.process_event(RelayEvent::ConnectionAccepted { session_id: 2 }).unwrap();

        assert!(matches!(actions[0], RelayAction::CloseConnection { session_id: 2, .. }));
        assert_eq!(driver.connection_count(), 1);
    }

    #[test]
    fn frame_for_unknown_session_is_an_error() {
        let (mut driver, _env, _history) = driver();

        let result = driver
            .process_event(RelayEvent::FrameReceived { session_id: 99, frame: ClientFrame::Ping });

        assert!(matches!(result, Err(ServerError::SessionNotFound(99))));
    }

    #[test]
    fn malformed_line_is_fatal_only_before_registration() {
        let (mut driver, _env, _history) = driver();
        driver.process_event(RelayEvent::ConnectionAccepted { session_id: 1 }).unwrap();

        let actions = driver
            .process_event(RelayEvent::FrameRejected {
                session_id: 1,
                reason: "not json".to_string(),
            })
            .unwrap();
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, RelayAction::CloseConnection { session_id: 1, .. }))
        );

        connect_and_register(&mut driver, 2, "bob");
        let actions = driver
            .process_event(RelayEvent::FrameRejected {
                session_id: 2,
                reason: "not json".to_string(),
            })
            .unwrap();
        assert!(
            actions
                .iter()
                .all(|a| !matches!(a, RelayAction::CloseConnection { .. }))
        );
        assert_eq!(driver.roster(), ["bob"]);
    }

    #[derive(Clone)]
    struct FailingHistoryStore;

    impl HistoryStore for FailingHistoryStore {
        fn append(&self, _message: &StoredMessage) -> Result<(), StorageError> {
            Err(StorageError::Backend("store offline".to_string()))
        }

        fn query(&self, _a: &str, _b: &str) -> Result<Vec<StoredMessage>, StorageError> {
            Err(StorageError::Backend("store offline".to_string()))
        }
    }

    #[test]
    fn chat_survives_a_failing_history_store() {
        let env = TestEnv::new();
        let mut driver = RelayDriver::new(
            env,
            MemoryUserDirectory::new(),
            FailingHistoryStore,
            DriverConfig::default(),
        );

        connect_and_register(&mut driver, 1, "alice");
        connect_and_register(&mut driver, 2, "bob");

        let actions = driver
            .process_event(RelayEvent::FrameReceived {
                session_id: 1,
                frame: ClientFrame::Send { receiver: "bob".to_string(), content: "hi".to_string() },
            })
            .unwrap();

        // Delivery still happens; replays degrade to empty histories.
        let to_bob = sends_to(&actions, 2);
        assert!(matches!(to_bob[0], ServerFrame::Delivered { .. }));
        assert!(matches!(&to_bob[1], ServerFrame::History { messages, .. } if messages.is_empty()));
        assert!(actions.iter().any(|a| matches!(a, RelayAction::Log { level: LogLevel::Error, .. })));
    }
}
