//! Palaver relay server.
//!
//! Production runtime for the presence-and-routing engine: tracks which
//! display names are connected, enforces at-most-one live session per
//! name, routes point-to-point messages, broadcasts roster changes, and
//! replays persisted history.
//!
//! # Architecture
//!
//! The [`RelayDriver`] follows the sans-io pattern: it consumes
//! [`RelayEvent`]s and returns [`RelayAction`]s, doing no I/O of its own.
//! This crate provides the glue that feeds it real connections:
//!
//! - [`Server`]: owns the driver behind a mutex and runs the accept loops
//! - [`TcpTransport`]: newline-delimited JSON over raw TCP
//! - `ws`: the WebSocket front end, same frames as text messages
//! - [`SystemEnv`]: real time and cryptographic RNG
//! - [`storage`]: the persisted user directory and chat log (in-memory and
//!   redb-backed)
//!
//! Every event is processed while the driver mutex is held — that is what
//! makes registration linearizable — but socket writes always happen after
//! the lock is released, against a separate per-session writer map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod presence;
mod registry;
mod replay;
mod router;
mod server_error;
pub mod storage;
mod system_env;
mod transport;
mod ws;

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

pub use driver::{DriverConfig, LogLevel, RelayAction, RelayDriver, RelayEvent};
use palaver_core::Environment;
use palaver_proto::{ClientFrame, MAX_FRAME_LEN};
pub use presence::PresenceBroadcaster;
pub use registry::{ConnectionRegistry, RegisterError};
pub use replay::HistoryReplayer;
pub use router::{MessageRouter, RouteOutcome};
pub use server_error::ServerError;
pub use storage::{
    HistoryStore, MemoryHistoryStore, MemoryUserDirectory, RedbStore, StorageError, UserDirectory,
};
pub use system_env::SystemEnv;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    net::TcpStream,
    sync::RwLock,
};
pub use transport::TcpTransport;
use transport::{ConnectionHandle, SessionWriter};

/// Shared state for all connections.
///
/// Maps session IDs to their connection handles. Kept outside the driver so
/// that writes never happen inside the driver's critical section.
struct SharedState {
    /// Session ID → connection handle (writer + forced-close signal)
    connections: RwLock<HashMap<u64, Arc<ConnectionHandle>>>,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address for the raw TCP front end (e.g., "0.0.0.0:4040")
    pub bind_address: String,
    /// Optional address for the WebSocket front end
    pub ws_bind_address: Option<String>,
    /// Driver configuration (timeouts, limits)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4040".to_string(),
            ws_bind_address: None,
            driver: DriverConfig::default(),
        }
    }
}

/// Production Palaver server.
///
/// Wraps [`RelayDriver`] with the TCP (and optionally WebSocket) front ends
/// and the system environment. Generic over the two persistence
/// collaborators so the same runtime serves in-memory and redb-backed
/// deployments.
pub struct Server<D, H>
where
    D: UserDirectory,
    H: HistoryStore,
{
    /// The action-based relay driver
    driver: Arc<tokio::sync::Mutex<RelayDriver<SystemEnv, D, H>>>,
    /// Raw TCP listener
    transport: TcpTransport,
    /// Optional WebSocket listener
    ws_transport: Option<TcpTransport>,
    /// Per-session writers
    shared: Arc<SharedState>,
    /// Environment
    env: SystemEnv,
    /// Interval between timeout-checking ticks
    tick_interval: Duration,
}

impl<D, H> Server<D, H>
where
    D: UserDirectory,
    H: HistoryStore,
{
    /// Create and bind a new server.
    pub async fn bind(
        config: ServerRuntimeConfig,
        users: D,
        history: H,
    ) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let tick_interval =
            (config.driver.session.idle_timeout / 4).max(Duration::from_secs(1));
        let driver = RelayDriver::new(env.clone(), users, history, config.driver);

        let transport = TcpTransport::bind(&config.bind_address).await?;
        let ws_transport = match &config.ws_bind_address {
            Some(address) => Some(TcpTransport::bind(address).await?),
            None => None,
        };

        Ok(Self {
            driver: Arc::new(tokio::sync::Mutex::new(driver)),
            transport,
            ws_transport,
            shared: Arc::new(SharedState { connections: RwLock::new(HashMap::new()) }),
            env,
            tick_interval,
        })
    }

    /// Local address of the TCP front end.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Local address of the WebSocket front end, if one is configured.
    pub fn ws_local_addr(&self) -> Result<Option<SocketAddr>, ServerError> {
        self.ws_transport.as_ref().map(TcpTransport::local_addr).transpose()
    }

    /// Run the server, accepting connections and processing frames.
    ///
    /// This method runs until the process is shut down or the listener
    /// fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self { driver, transport, ws_transport, shared, env, tick_interval } = self;

        tokio::spawn(run_ticker(Arc::clone(&driver), Arc::clone(&shared), tick_interval));

        if let Some(ws_listener) = ws_transport {
            tokio::spawn(ws::run_acceptor(
                ws_listener,
                Arc::clone(&driver),
                Arc::clone(&shared),
                env.clone(),
            ));
        }

        loop {
            match transport.accept().await {
                Ok((stream, addr)) => {
                    let driver = Arc::clone(&driver);
                    let shared = Arc::clone(&shared);
                    let env = env.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_tcp_connection(stream, addr, driver, shared, env).await
                        {
                            tracing::debug!("connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {}", e);
                },
            }
        }
    }
}

/// Handle a single raw TCP connection.
async fn handle_tcp_connection<D, H>(
    stream: TcpStream,
    addr: SocketAddr,
    driver: Arc<tokio::sync::Mutex<RelayDriver<SystemEnv, D, H>>>,
    shared: Arc<SharedState>,
    env: SystemEnv,
) -> Result<(), ServerError>
where
    D: UserDirectory,
    H: HistoryStore,
{
    let session_id = env.random_u64();
    tracing::debug!("new tcp connection from {}: session {}", addr, session_id);

    let (read_half, write_half) = stream.into_split();
    let handle = Arc::new(ConnectionHandle::new(SessionWriter::Tcp(write_half)));
    shared.connections.write().await.insert(session_id, Arc::clone(&handle));

    dispatch_event(&driver, &shared, RelayEvent::ConnectionAccepted { session_id }).await;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    // One extra byte past the limit so an exactly-MAX_FRAME_LEN line (plus
    // newline) still reads whole.
    let line_cap = (MAX_FRAME_LEN + 2) as u64;

    loop {
        line.clear();
        // Re-arm the length cap for every line.
        let mut limited = (&mut reader).take(line_cap);

        tokio::select! {
            () = handle.shutdown.notified() => break,
            read = limited.read_line(&mut line) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if n as u64 == line_cap && !line.ends_with('\n') {
                        dispatch_event(&driver, &shared, RelayEvent::FrameRejected {
                            session_id,
                            reason: format!("frame exceeds {MAX_FRAME_LEN} bytes"),
                        })
                        .await;
                        break;
                    }

                    let event = match ClientFrame::decode(&line) {
                        Ok(frame) => RelayEvent::FrameReceived { session_id, frame },
                        Err(e) => RelayEvent::FrameRejected { session_id, reason: e.to_string() },
                    };
                    dispatch_event(&driver, &shared, event).await;
                },
                Err(e) => {
                    tracing::debug!("read error on session {}: {}", session_id, e);
                    break;
                },
            }
        }
    }

    // Guaranteed cleanup: runs whatever ended the loop (peer close, read
    // error, forced shutdown), so deregistration and the roster broadcast
    // fire exactly once per session.
    shared.connections.write().await.remove(&session_id);
    dispatch_event(&driver, &shared, RelayEvent::ConnectionClosed {
        session_id,
        reason: "connection closed".to_string(),
    })
    .await;

    Ok(())
}

/// Feed one event to the driver, then execute the resulting actions.
///
/// The driver lock is released before any action touches a socket.
async fn dispatch_event<D, H>(
    driver: &Arc<tokio::sync::Mutex<RelayDriver<SystemEnv, D, H>>>,
    shared: &SharedState,
    event: RelayEvent,
) where
    D: UserDirectory,
    H: HistoryStore,
{
    let actions = {
        let mut driver = driver.lock().await;
        match driver.process_event(event) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!("event processing error: {}", e);
                return;
            },
        }
    };

    execute_actions(actions, shared).await;
}

/// Execute relay actions against the writer map.
async fn execute_actions(actions: Vec<RelayAction>, shared: &SharedState) {
    for action in actions {
        match action {
            RelayAction::SendToSession { session_id, frame } => {
                send_to(shared, session_id, &frame).await;
            },

            RelayAction::Broadcast { session_ids, frame } => {
                for session_id in session_ids {
                    send_to(shared, session_id, &frame).await;
                }
            },

            RelayAction::CloseConnection { session_id, reason } => {
                tracing::info!("closing session {}: {}", session_id, reason);

                let handle = shared.connections.write().await.remove(&session_id);
                if let Some(handle) = handle {
                    handle.writer.lock().await.shutdown().await;
                    handle.shutdown.notify_one();
                }
            },

            RelayAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

/// Best-effort frame write to one session.
///
/// Failures are logged and dropped: a dead peer's own read task is already
/// on its way to the cleanup path.
async fn send_to(shared: &SharedState, session_id: u64, frame: &palaver_proto::ServerFrame) {
    let handle = shared.connections.read().await.get(&session_id).cloned();

    match handle {
        Some(handle) => {
            if let Err(e) = handle.writer.lock().await.send_frame(frame).await {
                tracing::warn!("write failed for session {}: {}", session_id, e);
            }
        },
        None => {
            tracing::debug!("dropping frame for departed session {}", session_id);
        },
    }
}

/// Periodic tick loop driving idle-timeout detection.
async fn run_ticker<D, H>(
    driver: Arc<tokio::sync::Mutex<RelayDriver<SystemEnv, D, H>>>,
    shared: Arc<SharedState>,
    interval: Duration,
) where
    D: UserDirectory,
    H: HistoryStore,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        dispatch_event(&driver, &shared, RelayEvent::Tick).await;
    }
}
