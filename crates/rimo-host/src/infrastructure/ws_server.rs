//! WebSocket server for the direct real-time channel.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket session.
//! 3. Running the token handshake on the session's first frame.
//! 4. Registering the session with the [`Hub`](crate::application::Hub) and
//!    pumping frames both ways until the socket closes.
//! 5. Stopping the accept loop when the `running` flag is cleared.
//!
//! # Handshake (for beginners)
//!
//! A browser cannot attach custom headers to a WebSocket upgrade, so the
//! credential travels in the first text frame instead:
//!
//! ```text
//! client                              server
//!   │ ── {"token":"1a2b3c4d"} ──────────► │  authorize_handshake()
//!   │ ◄────────── {"status":"accepted"} ─ │  → HubEvent::Connected
//!   │ ◄── {"status":"rejected",...} ───── │  → close
//! ```
//!
//! A client that sends nothing within [`HANDSHAKE_TIMEOUT`] is dropped.
//!
//! # Per-session tasks
//!
//! After the handshake the socket is split.  A writer task drains the
//! session's bounded outbound queue (filled by the hub) into the sink; the
//! session task itself reads frames, decodes them into [`Command`]s and
//! forwards them to the hub in arrival order.

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
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
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rimo_core::credentials::redact;
use rimo_core::protocol::handshake::{HandshakeReply, HandshakeRequest};
use rimo_core::{decode_command, encode_command, Command, CredentialStore, TransportKind};
use rimo_core::SAME_MACHINE_TOKEN;

use crate::application::HubEvent;
use crate::infrastructure::lock_credentials;

/// How long a new session may wait before sending its handshake frame.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Depth of each session's outbound queue.
const OUTBOUND_QUEUE: usize = 128;

/// Shared state every session task needs.
#[derive(Clone)]
pub struct ServerContext {
    pub credentials: Arc<Mutex<CredentialStore>>,
    pub hub: mpsc::Sender<HubEvent>,
    /// Accept loopback peers without checking their token.
    pub trust_loopback: bool,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `addr` and runs the accept loop until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound.
pub async fn run_server(
    addr: SocketAddr,
    ctx: ServerContext,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind real-time listener on {addr}"))?;

    info!("real-time channel listening on {addr}");
    serve(listener, ctx, running).await
}

/// Runs the accept loop on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    ctx: ServerContext,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the `running` flag is rechecked while idle.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_session(stream, peer_addr, ctx).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    Ok(())
}

/// Decides whether a handshake is accepted.
///
/// Accepted when `token` is the same-machine sentinel, when the peer is on
/// loopback and `trust_loopback` is set, or when the credential store knows the token and it has not
/// expired.  Every other case gets the same rejection, so a client cannot
/// tell an unknown token from an expired one.
pub fn authorize_handshake(
    credentials: &Mutex<CredentialStore>,
    token: &str,
    peer: IpAddr,
    trust_loopback: bool,
) -> HandshakeReply {
    if token == SAME_MACHINE_TOKEN || (trust_loopback && is_loopback(peer)) {
        return HandshakeReply::Accepted;
    }
    if lock_credentials(credentials).is_token_valid(token) {
        HandshakeReply::Accepted
    } else {
        HandshakeReply::auth_rejected()
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Wraps [`run_session`] and logs the outcome.
async fn handle_session(stream: TcpStream, peer_addr: SocketAddr, ctx: ServerContext) {
    match run_session(stream, peer_addr, ctx).await {
        Ok(()) => debug!("session {peer_addr} closed"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: ServerContext,
) -> anyhow::Result<()> {
    let mut ws = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket upgrade failed with {peer_addr}"))?;

    // ── Step 1: handshake ──────────────────────────────────────────────────────
    let first = timeout(HANDSHAKE_TIMEOUT, first_text(&mut ws))
        .await
        .with_context(|| format!("{peer_addr} sent no handshake"))?;
    let Some(first) = first else {
        return Ok(());
    };

    let reply = match serde_json::from_str::<HandshakeRequest>(&first) {
        Ok(req) => {
            let reply = authorize_handshake(
                &ctx.credentials,
                &req.token,
                peer_addr.ip(),
                ctx.trust_loopback,
            );
            info!(
                token = %redact(&req.token),
                accepted = matches!(reply, HandshakeReply::Accepted),
                "handshake from {peer_addr}"
            );
            reply
        }
        Err(e) => {
            warn!("malformed handshake from {peer_addr}: {e}");
            HandshakeReply::auth_rejected()
        }
    };

    ws.send(WsMessage::Text(serde_json::to_string(&reply)?))
        .await
        .context("failed to send handshake reply")?;
    if !matches!(reply, HandshakeReply::Accepted) {
        let _ = ws.close(None).await;
        return Ok(());
    }

    // ── Step 2: join the hub ───────────────────────────────────────────────────
    let id = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::channel::<Command>(OUTBOUND_QUEUE);
    ctx.hub
        .send(HubEvent::Connected {
            id,
            transport: TransportKind::Direct,
            outbound: out_tx,
        })
        .await
        .context("hub is not running")?;

    let (mut sink, mut frames) = ws.split();

    // ── Step 3: writer task ────────────────────────────────────────────────────
    let writer = tokio::spawn(async move {
        while let Some(cmd) = out_rx.recv().await {
            let text = match encode_command(&cmd) {
                Ok(t) => t,
                Err(e) => {
                    error!(%id, "failed to encode {}: {e}", cmd.type_name());
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                debug!(%id, "socket send failed; peer gone");
                break;
            }
        }
    });

    // ── Step 4: reader loop ────────────────────────────────────────────────────
    loop {
        let text = match frames.next().await {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => break,
            Some(Err(e)) => {
                warn!(%id, "socket error: {e}");
                break;
            }
        };
        match decode_command(&text) {
            Ok(command) => {
                debug!(%id, "received {}", command.type_name());
                if ctx.hub.send(HubEvent::Inbound { id, command }).await.is_err() {
                    break;
                }
            }
            // One bad frame does not end the session.
            Err(e) => warn!(%id, "dropping malformed frame: {e}"),
        }
    }

    writer.abort();
    let _ = ctx.hub.send(HubEvent::Disconnected { id }).await;
    info!(%id, "connection from {peer_addr} closed");
    Ok(())
}

/// First text frame, or `None` if the peer closed first.
async fn first_text<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>) -> Option<String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return Some(text),
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rimo_core::ManualClock;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn store() -> (Arc<Mutex<CredentialStore>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            Arc::new(Mutex::new(CredentialStore::new(clock.clone()))),
            clock,
        )
    }

    fn remote() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))
    }

    #[test]
    fn test_sentinel_is_accepted_from_anywhere() {
        let (creds, _) = store();
        assert_eq!(
            authorize_handshake(&creds, SAME_MACHINE_TOKEN, remote(), true),
            HandshakeReply::Accepted
        );
    }

    #[test]
    fn test_loopback_peer_needs_no_valid_token() {
        let (creds, _) = store();
        let v4 = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        let mapped = IpAddr::V6(Ipv4Addr::LOCALHOST.to_ipv6_mapped());

        for peer in [v4, v6, mapped] {
            assert_eq!(
                authorize_handshake(&creds, "garbage", peer, true),
                HandshakeReply::Accepted,
                "{peer}"
            );
        }
    }

    #[test]
    fn test_loopback_trust_can_be_disabled() {
        let (creds, _) = store();
        assert_eq!(
            authorize_handshake(&creds, "garbage", IpAddr::V4(Ipv4Addr::LOCALHOST), false),
            HandshakeReply::auth_rejected()
        );
    }

    #[test]
    fn test_remote_token_must_be_live() {
        // Arrange
        let (creds, clock) = store();
        let token = creds.lock().unwrap().issue_token();

        // Act / Assert
        assert_eq!(
            authorize_handshake(&creds, &token.value, remote(), true),
            HandshakeReply::Accepted
        );
        clock.advance(Duration::from_secs(3_601));
        assert_eq!(
            authorize_handshake(&creds, &token.value, remote(), true),
            HandshakeReply::auth_rejected()
        );
    }

    #[test]
    fn test_unknown_token_is_rejected_like_expired() {
        let (creds, _) = store();
        assert_eq!(
            authorize_handshake(&creds, "deadbeef", remote(), true),
            HandshakeReply::auth_rejected()
        );
    }
}
