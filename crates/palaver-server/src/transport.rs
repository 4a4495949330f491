//! Transport primitives shared by the front ends.
//!
//! The relay core is transport-independent; a front end only has to supply
//! accept, frame-send, and close. [`TcpTransport`] is the listener wrapper
//! used by both front ends (the WebSocket one upgrades accepted streams),
//! and [`SessionWriter`] unifies "send one frame to this peer" across the
//! newline-delimited TCP protocol and WebSocket text messages, so the
//! action executor never knows which kind of peer it is writing to.

use std::net::SocketAddr;

use futures_util::{SinkExt, stream::SplitSink};
use palaver_proto::ServerFrame;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::{Mutex, Notify},
};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};

use crate::server_error::ServerError;

/// TCP listener wrapper.
pub struct TcpTransport {
    /// Bound listener
    listener: TcpListener,
}

impl TcpTransport {
    /// Create and bind a new TCP transport.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        Ok(Self { listener })
    }

    /// Accept a new connection.
    ///
    /// This method blocks until a connection is available.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        self.listener
            .accept()
            .await
            .map_err(|e| ServerError::Transport(format!("accept failed: {e}")))
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }
}

/// Write capability for one connected peer, framing included.
pub(crate) enum SessionWriter {
    /// Raw TCP peer: one JSON object per newline-terminated line.
    Tcp(OwnedWriteHalf),
    /// WebSocket peer: one JSON object per text message.
    Ws(SplitSink<WebSocketStream<TcpStream>, Message>),
}

impl SessionWriter {
    /// Encode and send one frame.
    pub(crate) async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), ServerError> {
        let line = frame.encode()?;

        match self {
            Self::Tcp(writer) => {
                let mut buf = line;
                buf.push('\n');
                writer
                    .write_all(buf.as_bytes())
                    .await
                    .map_err(|e| ServerError::Transport(e.to_string()))
            },
            Self::Ws(sink) => sink
                .send(Message::text(line))
                .await
                .map_err(|e| ServerError::Transport(e.to_string())),
        }
    }

    /// Best-effort close of the write side.
    pub(crate) async fn shutdown(&mut self) {
        match self {
            Self::Tcp(writer) => {
                let _ = writer.shutdown().await;
            },
            Self::Ws(sink) => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
            },
        }
    }
}

/// Runtime handle for one live connection.
///
/// The read task and the action executor both hold an `Arc` of this: the
/// executor writes frames through `writer` and signals forced closes
/// through `shutdown`; the read task selects on `shutdown` so a timeout or
/// rejected registration tears the connection down even if the peer stays
/// silent.
pub(crate) struct ConnectionHandle {
    /// Per-peer writer, serialized so frames never interleave
    pub(crate) writer: Mutex<SessionWriter>,
    /// Forced-close signal for the read task
    pub(crate) shutdown: Notify,
}

impl ConnectionHandle {
    /// Wrap a writer in a fresh handle.
    pub(crate) fn new(writer: SessionWriter) -> Self {
        Self { writer: Mutex::new(writer), shutdown: Notify::new() }
    }
}
