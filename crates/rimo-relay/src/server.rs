//! WebSocket server for the relay service.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener and upgrading each connection to WebSocket.
//! 2. Checking the access key in the session's first frame.
//! 3. Answering request/response operations against the hosted store.
//! 4. Turning a `subscribe` session into a one-way push of log entries.
//! 5. Stopping the accept loop when the `running` flag is cleared.
//!
//! A subscription lasts as long as its socket.  When the socket closes the
//! entry receiver is dropped, and the store hands any entry the subscriber
//! had not deleted to the next live subscriber.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use rimo_core::protocol::handshake::{HandshakeReply, HandshakeRequest};
use rimo_core::OwnerId;
use rimo_link::{RelayEntry, RelayError, RelayReply, RelayRequest, RelayStore};

/// How long a new session may wait before sending its handshake frame.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state every session task needs.
#[derive(Clone)]
pub struct RelayContext {
    pub store: Arc<dyn RelayStore>,
    /// Required handshake token; `None` accepts any.
    pub access_key: Option<String>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `addr` and runs the accept loop until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound.
pub async fn run_server(
    addr: SocketAddr,
    ctx: RelayContext,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {addr}"))?;

    info!("relay service listening on {addr}");
    serve(listener, ctx, running).await
}

/// Runs the accept loop on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    ctx: RelayContext,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new relay client from {peer_addr}");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    match run_session(stream, peer_addr, ctx).await {
                        Ok(()) => debug!("relay session {peer_addr} closed"),
                        Err(e) => warn!("relay session {peer_addr} closed with error: {e:#}"),
                    }
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    Ok(())
}

/// Accepts `token` when no key is configured or when it equals the key.
pub fn authorize(access_key: Option<&str>, token: &str) -> HandshakeReply {
    match access_key {
        None => HandshakeReply::Accepted,
        Some(key) if key == token => HandshakeReply::Accepted,
        Some(_) => HandshakeReply::auth_rejected(),
    }
}

/// Answers one request/response operation.  `subscribe` is not one; it is
/// refused here and handled by the session itself.
pub async fn answer(store: &dyn RelayStore, request: RelayRequest) -> RelayReply {
    let result = match request {
        RelayRequest::Append { owner, command } => store
            .append(&owner, command)
            .await
            .map(|key| RelayReply::Appended { key }),
        RelayRequest::Delete { owner, key } => {
            store.delete(&owner, key).await.map(|()| RelayReply::Done)
        }
        RelayRequest::PublishFrame { owner, blob } => store
            .publish_frame(&owner, blob)
            .await
            .map(|()| RelayReply::Done),
        RelayRequest::LatestFrame { owner } => store
            .latest_frame(&owner)
            .await
            .map(|blob| RelayReply::Frame { blob }),
        RelayRequest::PublishConnection { owner, record } => store
            .publish_connection(&owner, record)
            .await
            .map(|()| RelayReply::Done),
        RelayRequest::Connection { owner } => store
            .connection(&owner)
            .await
            .map(|record| RelayReply::Connection { record }),
        RelayRequest::Subscribe { .. } => Err(RelayError::Refused(
            "subscribe must be the first request on its own socket".into(),
        )),
    };
    result.unwrap_or_else(|e| RelayReply::Error {
        message: e.to_string(),
    })
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: RelayContext,
) -> anyhow::Result<()> {
    let mut ws = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket upgrade failed with {peer_addr}"))?;

    // ── Step 1: access key ─────────────────────────────────────────────────────
    let first = timeout(HANDSHAKE_TIMEOUT, next_text(&mut ws))
        .await
        .with_context(|| format!("{peer_addr} sent no handshake"))?;
    let Some(first) = first else {
        return Ok(());
    };
    let reply = match serde_json::from_str::<HandshakeRequest>(&first) {
        Ok(req) => authorize(ctx.access_key.as_deref(), &req.token),
        Err(e) => {
            warn!("malformed relay handshake from {peer_addr}: {e}");
            HandshakeReply::auth_rejected()
        }
    };
    send_json(&mut ws, &reply).await?;
    if !matches!(reply, HandshakeReply::Accepted) {
        info!("relay client {peer_addr} rejected");
        let _ = ws.close(None).await;
        return Ok(());
    }

    // ── Step 2: requests ───────────────────────────────────────────────────────
    while let Some(text) = next_text(&mut ws).await {
        let request = match serde_json::from_str::<RelayRequest>(&text) {
            Ok(request) => request,
            Err(e) => {
                send_json(
                    &mut ws,
                    &RelayReply::Error {
                        message: format!("malformed request: {e}"),
                    },
                )
                .await?;
                continue;
            }
        };

        if let RelayRequest::Subscribe { owner } = request {
            return match ctx.store.subscribe(&owner).await {
                Ok(entries) => {
                    send_json(&mut ws, &RelayReply::Done).await?;
                    info!(%owner, "relay subscriber {peer_addr} attached");
                    pump_subscription(ws, entries, &owner).await
                }
                Err(e) => {
                    send_json(
                        &mut ws,
                        &RelayReply::Error {
                            message: e.to_string(),
                        },
                    )
                    .await
                }
            };
        }

        let reply = answer(ctx.store.as_ref(), request).await;
        send_json(&mut ws, &reply).await?;
    }

    Ok(())
}

/// Pushes entries to a subscriber until either side goes away.
async fn pump_subscription(
    ws: WebSocketStream<TcpStream>,
    mut entries: mpsc::UnboundedReceiver<RelayEntry>,
    owner: &OwnerId,
) -> anyhow::Result<()> {
    let (mut sink, mut frames) = ws.split();
    loop {
        tokio::select! {
            entry = entries.recv() => {
                let Some(RelayEntry { key, command }) = entry else {
                    break;
                };
                let text = serde_json::to_string(&RelayReply::Entry { key, command })?;
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(%owner, "relay subscriber detached");
    Ok(())
}

async fn send_json<T: serde::Serialize>(
    ws: &mut WebSocketStream<TcpStream>,
    value: &T,
) -> anyhow::Result<()> {
    ws.send(WsMessage::Text(serde_json::to_string(value)?))
        .await
        .context("failed to send relay reply")
}

/// Next text frame, or `None` once the peer has gone.
async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return Some(text),
            Some(Ok(WsMessage::Close(_)))
            | Some(Err(WsError::ConnectionClosed | WsError::Protocol(_)))
            | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("relay socket error: {e}");
                return None;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
