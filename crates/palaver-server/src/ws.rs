//! WebSocket front end.
//!
//! The second binding of the same relay semantics: each WebSocket text
//! message carries exactly one JSON frame, with no trailing newline. All
//! registration, routing, and presence logic lives in the shared
//! [`RelayDriver`](crate::RelayDriver); this module only upgrades accepted
//! streams and translates messages into the same events the TCP front end
//! produces.

use std::{net::SocketAddr, sync::Arc};

use futures_util::StreamExt;
use palaver_core::Environment;
use palaver_proto::ClientFrame;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    RelayDriver, RelayEvent, ServerError, SharedState, SystemEnv, TcpTransport, dispatch_event,
    storage::{HistoryStore, UserDirectory},
    transport::{ConnectionHandle, SessionWriter},
};

/// Accept loop for the WebSocket listener.
pub(crate) async fn run_acceptor<D, H>(
    transport: TcpTransport,
    driver: Arc<tokio::sync::Mutex<RelayDriver<SystemEnv, D, H>>>,
    shared: Arc<SharedState>,
    env: SystemEnv,
) where
    D: UserDirectory,
    H: HistoryStore,
{
    loop {
        match transport.accept().await {
            Ok((stream, addr)) => {
                let driver = Arc::clone(&driver);
                let shared = Arc::clone(&shared);
                let env = env.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_ws_connection(stream, addr, driver, shared, env).await {
                        tracing::debug!("websocket connection error: {}", e);
                    }
                });
            },
            Err(e) => {
                tracing::error!("websocket accept error: {}", e);
            },
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_ws_connection<D, H>(
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
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| ServerError::Transport(format!("websocket handshake failed: {e}")))?;

    let session_id = env.random_u64();
    tracing::debug!("new websocket connection from {}: session {}", addr, session_id);

    let (sink, mut source) = ws.split();
    let handle = Arc::new(ConnectionHandle::new(SessionWriter::Ws(sink)));
    shared.connections.write().await.insert(session_id, Arc::clone(&handle));

    dispatch_event(&driver, &shared, RelayEvent::ConnectionAccepted { session_id }).await;

    loop {
        tokio::select! {
            () = handle.shutdown.notified() => break,
            message = source.next() => match message {
                None => break,
                Some(Err(e)) => {
                    tracing::debug!("websocket read error on session {}: {}", session_id, e);
                    break;
                },
                Some(Ok(Message::Text(text))) => {
                    let event = match ClientFrame::decode(text.as_str()) {
                        Ok(frame) => RelayEvent::FrameReceived { session_id, frame },
                        Err(e) => RelayEvent::FrameRejected { session_id, reason: e.to_string() },
                    };
                    dispatch_event(&driver, &shared, event).await;
                },
                Some(Ok(Message::Binary(_))) => {
                    dispatch_event(&driver, &shared, RelayEvent::FrameRejected {
                        session_id,
                        reason: "binary frames are not supported".to_string(),
                    })
                    .await;
                },
                Some(Ok(Message::Close(_))) => break,
                // Transport-level keepalives; tungstenite answers pings itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {},
            }
        }
    }

    // Same guaranteed cleanup as the TCP front end.
    shared.connections.write().await.remove(&session_id);
    dispatch_event(&driver, &shared, RelayEvent::ConnectionClosed {
        session_id,
        reason: "connection closed".to_string(),
    })
    .await;

    Ok(())
}
