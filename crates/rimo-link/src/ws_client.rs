//! Direct-channel WebSocket client.
//!
//! [`WsConnector`] opens the socket, performs the token handshake, and hands
//! back a [`DirectLink`]: a pair of channels backed by two tasks, one
//! writing encoded commands to the socket and one decoding incoming frames.
//! Dropping the link aborts both tasks.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tracing::{debug, warn};

use rimo_core::protocol::handshake::{HandshakeReply, HandshakeRequest};
use rimo_core::{decode_command, encode_command, Command};

use crate::router::{ConnectError, Connector};

/// How long to wait for the server's handshake reply.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const LINK_CHANNEL_CAPACITY: usize = 128;

// ── Connector ─────────────────────────────────────────────────────────────────

/// Production [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Link = DirectLink;

    async fn connect(&self, target: &str, token: &str) -> Result<DirectLink, ConnectError> {
        let (mut ws, _response) = connect_async(target)
            .await
            .map_err(|e| ConnectError::Unreachable(e.to_string()))?;

        let hello = serde_json::to_string(&HandshakeRequest {
            token: token.to_string(),
        })
        .map_err(|e| ConnectError::Handshake(e.to_string()))?;
        ws.send(WsMessage::Text(hello))
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        let reply = match timeout(self.handshake_timeout, next_text(&mut ws)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ConnectError::Handshake("no reply from server".into())),
        };

        match serde_json::from_str::<HandshakeReply>(&reply) {
            Ok(HandshakeReply::Accepted) => {
                debug!("direct channel to {target} accepted");
                Ok(DirectLink::spawn(ws))
            }
            Ok(HandshakeReply::Rejected { reason }) => Err(ConnectError::Rejected(reason)),
            Err(e) => Err(ConnectError::Handshake(format!("unexpected reply: {e}"))),
        }
    }
}

/// Reads frames until the first text frame.
async fn next_text<S>(ws: &mut WebSocketStream<S>) -> Result<String, ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(text),
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(ConnectError::Handshake("closed before reply".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ConnectError::Handshake(e.to_string())),
        }
    }
}

// ── Link ──────────────────────────────────────────────────────────────────────

/// Error returned when sending on a link whose writer has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("direct link closed")]
pub struct LinkClosed;

/// An open, authenticated direct channel.
pub struct DirectLink {
    outbound: mpsc::Sender<Command>,
    inbound: mpsc::Receiver<Command>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl DirectLink {
    /// Starts the reader and writer tasks over an already-authenticated
    /// socket.
    pub fn spawn<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Command>(LINK_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<Command>(LINK_CHANNEL_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(cmd) = out_rx.recv().await {
                let text = match encode_command(&cmd) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("dropping unencodable {}: {e}", cmd.type_name());
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    debug!("direct link send failed (peer disconnected)");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            loop {
                let msg = match stream.next().await {
                    Some(Ok(m)) => m,
                    Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => {
                        debug!("direct link closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("direct link error: {e}");
                        break;
                    }
                };
                match msg {
                    WsMessage::Text(text) => match decode_command(&text) {
                        Ok(cmd) => {
                            if in_tx.send(cmd).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("ignoring invalid frame: {e}"),
                    },
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        });

        Self {
            outbound: out_tx,
            inbound: in_rx,
            reader,
            writer,
        }
    }

    /// Queues a command for sending, preserving call order.
    pub async fn send(&self, cmd: Command) -> Result<(), LinkClosed> {
        self.outbound.send(cmd).await.map_err(|_| LinkClosed)
    }

    /// Returns a clonable sender onto this link.
    pub fn sender(&self) -> mpsc::Sender<Command> {
        self.outbound.clone()
    }

    /// Receives the next command from the peer; `None` once the link closes.
    pub async fn recv(&mut self) -> Option<Command> {
        self.inbound.recv().await
    }

    /// `true` while the writer task is still running.
    pub fn is_open(&self) -> bool {
        !self.writer.is_finished()
    }
}

impl Drop for DirectLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
