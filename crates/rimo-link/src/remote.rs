//! [`RelayStore`] over a WebSocket connection to a relay service.
//!
//! # Wire format (for beginners)
//!
//! A client opens a socket and authenticates with the same first frame the
//! real-time channel uses (`{"token": "<access key>"}`).  After that every
//! text frame is one JSON object tagged by `op`:
//!
//! ```text
//! client                                          relay service
//!   │ ── {"op":"append","owner":"u","command":{..}} ──► │
//!   │ ◄──────────────────── {"op":"appended","key":7} ─ │
//!   │ ── {"op":"latest-frame","owner":"u"} ───────────► │
//!   │ ◄────────────── {"op":"frame","blob":"data:.."} ─ │
//! ```
//!
//! Request/response operations share one socket, one request at a time.  A
//! `subscribe` request gets its own socket: after `{"op":"done"}` the service
//! only pushes `{"op":"entry",...}` frames on it, and closing the socket ends
//! the subscription.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use rimo_core::protocol::handshake::{HandshakeReply, HandshakeRequest};
use rimo_core::{Command, OwnerId};

use crate::relay::{ConnectionRecord, RelayEntry, RelayError, RelayStore};

/// How long a single relay request may take.
pub const RELAY_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Wire types ────────────────────────────────────────────────────────────────

/// Client → service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum RelayRequest {
    Append { owner: OwnerId, command: Command },
    Subscribe { owner: OwnerId },
    Delete { owner: OwnerId, key: u64 },
    PublishFrame { owner: OwnerId, blob: String },
    LatestFrame { owner: OwnerId },
    PublishConnection {
        owner: OwnerId,
        record: ConnectionRecord,
    },
    Connection { owner: OwnerId },
}

/// Service → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum RelayReply {
    Appended { key: u64 },
    Done,
    Entry { key: u64, command: Command },
    Frame { blob: Option<String> },
    Connection { record: Option<ConnectionRecord> },
    Error { message: String },
}

fn unavailable(e: impl std::fmt::Display) -> RelayError {
    RelayError::Unavailable(e.to_string())
}

fn unexpected(reply: &RelayReply) -> RelayError {
    match reply {
        RelayReply::Error { message } => RelayError::Refused(message.clone()),
        other => RelayError::Refused(format!("unexpected reply {other:?}")),
    }
}

// ── Socket helpers ────────────────────────────────────────────────────────────

async fn send_json<T: Serialize>(ws: &mut Socket, value: &T) -> Result<(), RelayError> {
    let text = serde_json::to_string(value).map_err(unavailable)?;
    ws.send(WsMessage::Text(text)).await.map_err(unavailable)
}

/// Next text frame; `None` once the socket is closed.
async fn next_text(ws: &mut Socket) -> Result<Option<String>, RelayError> {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(Some(text)),
            Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed)) => return Ok(None),
            Some(Err(e)) => return Err(unavailable(e)),
        }
    }
}

async fn read_reply(ws: &mut Socket) -> Result<RelayReply, RelayError> {
    let text = match timeout(RELAY_REQUEST_TIMEOUT, next_text(ws)).await {
        Ok(Ok(Some(text))) => text,
        Ok(Ok(None)) => return Err(unavailable("relay service closed the socket")),
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(unavailable("relay service did not answer")),
    };
    serde_json::from_str(&text).map_err(|e| RelayError::Refused(format!("bad reply: {e}")))
}

// ── Client ────────────────────────────────────────────────────────────────────

/// A [`RelayStore`] hosted by a relay service.
pub struct RemoteRelayStore {
    url: String,
    access_key: String,
    socket: Mutex<Option<Socket>>,
}

impl RemoteRelayStore {
    /// `url` is the service's `ws://`/`wss://` address; `access_key` is sent
    /// as the handshake token (empty when the service runs without one).
    pub fn new(url: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_key: access_key.into(),
            socket: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Opens and authenticates a fresh socket.
    async fn open(&self) -> Result<Socket, RelayError> {
        let (mut ws, _response) = timeout(RELAY_REQUEST_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| unavailable(format!("{} did not answer", self.url)))?
            .map_err(unavailable)?;

        send_json(
            &mut ws,
            &HandshakeRequest {
                token: self.access_key.clone(),
            },
        )
        .await?;
        let text = match timeout(RELAY_REQUEST_TIMEOUT, next_text(&mut ws)).await {
            Ok(Ok(Some(text))) => text,
            Ok(Ok(None)) | Err(_) => return Err(unavailable("no handshake reply")),
            Ok(Err(e)) => return Err(e),
        };
        match serde_json::from_str::<HandshakeReply>(&text) {
            Ok(HandshakeReply::Accepted) => Ok(ws),
            Ok(HandshakeReply::Rejected { reason }) => Err(RelayError::Refused(reason)),
            Err(e) => Err(RelayError::Refused(format!("bad handshake reply: {e}"))),
        }
    }

    /// Sends one request on the shared socket and waits for its reply.
    ///
    /// A cached socket that fails while sending is reopened once; a request
    /// that was sent is never repeated, so an append cannot land twice.
    async fn request(&self, req: &RelayRequest) -> Result<RelayReply, RelayError> {
        let mut guard = self.socket.lock().await;

        let mut ws = match guard.take() {
            Some(mut ws) => match send_json(&mut ws, req).await {
                Ok(()) => ws,
                Err(e) => {
                    debug!("cached relay socket failed ({e}); reconnecting");
                    let mut fresh = self.open().await?;
                    send_json(&mut fresh, req).await?;
                    fresh
                }
            },
            None => {
                let mut fresh = self.open().await?;
                send_json(&mut fresh, req).await?;
                fresh
            }
        };

        let reply = read_reply(&mut ws).await?;
        // Only a socket that answered is kept for the next request.
        *guard = Some(ws);
        Ok(reply)
    }
}

#[async_trait]
impl RelayStore for RemoteRelayStore {
    async fn append(&self, owner: &OwnerId, command: Command) -> Result<u64, RelayError> {
        let req = RelayRequest::Append {
            owner: owner.clone(),
            command,
        };
        match self.request(&req).await? {
            RelayReply::Appended { key } => Ok(key),
            other => Err(unexpected(&other)),
        }
    }

    async fn subscribe(
        &self,
        owner: &OwnerId,
    ) -> Result<mpsc::UnboundedReceiver<RelayEntry>, RelayError> {
        let mut ws = self.open().await?;
        send_json(
            &mut ws,
            &RelayRequest::Subscribe {
                owner: owner.clone(),
            },
        )
        .await?;
        match read_reply(&mut ws).await? {
            RelayReply::Done => {}
            other => return Err(unexpected(&other)),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let owner = owner.clone();
        tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    _ = tx.closed() => break,
                    text = next_text(&mut ws) => text,
                };
                let text = match text {
                    Ok(Some(text)) => text,
                    Ok(None) => {
                        debug!(%owner, "relay subscription closed by service");
                        break;
                    }
                    Err(e) => {
                        warn!(%owner, "relay subscription failed: {e}");
                        break;
                    }
                };
                match serde_json::from_str::<RelayReply>(&text) {
                    Ok(RelayReply::Entry { key, command }) => {
                        if tx.send(RelayEntry { key, command }).is_err() {
                            break;
                        }
                    }
                    Ok(other) => debug!(%owner, "ignoring {other:?} on subscription"),
                    Err(e) => warn!(%owner, "ignoring invalid relay frame: {e}"),
                }
            }
            let _ = ws.close(None).await;
        });
        Ok(rx)
    }

    async fn delete(&self, owner: &OwnerId, key: u64) -> Result<(), RelayError> {
        let req = RelayRequest::Delete {
            owner: owner.clone(),
            key,
        };
        match self.request(&req).await? {
            RelayReply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn publish_frame(&self, owner: &OwnerId, blob: String) -> Result<(), RelayError> {
        let req = RelayRequest::PublishFrame {
            owner: owner.clone(),
            blob,
        };
        match self.request(&req).await? {
            RelayReply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn latest_frame(&self, owner: &OwnerId) -> Result<Option<String>, RelayError> {
        let req = RelayRequest::LatestFrame {
            owner: owner.clone(),
        };
        match self.request(&req).await? {
            RelayReply::Frame { blob } => Ok(blob),
            other => Err(unexpected(&other)),
        }
    }

    async fn publish_connection(
        &self,
        owner: &OwnerId,
        record: ConnectionRecord,
    ) -> Result<(), RelayError> {
        let req = RelayRequest::PublishConnection {
            owner: owner.clone(),
            record,
        };
        match self.request(&req).await? {
            RelayReply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn connection(&self, owner: &OwnerId) -> Result<Option<ConnectionRecord>, RelayError> {
        let req = RelayRequest::Connection {
            owner: owner.clone(),
        };
        match self.request(&req).await? {
            RelayReply::Connection { record } => Ok(record),
            other => Err(unexpected(&other)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
