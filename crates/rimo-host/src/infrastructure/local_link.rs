//! The host's own connection to its real-time channel.
//!
//! The host's control surface is a client like any other: it connects over
//! loopback, declares itself as the `host` device (with the relay owner, if
//! one is configured), and from then on appears in every controller's device
//! list.  Declaring an owner is also what starts the hub's relay listener.
//!
//! If the connection is rejected for credential reasons, the router waits
//! briefly, the host re-issues its pairing code, and one more attempt is
//! made with the same-machine sentinel.  A second failure is a
//! configuration bug; it is logged and the host keeps serving remote
//! controllers without a local surface.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{debug, info};

use rimo_core::credentials::redact;
use rimo_core::{Command, CredentialStore, DeviceRole, OwnerId};
use rimo_link::{
    ConnectRequest, Connector, Established, Side, TargetHints, TransportRouter, WsConnector,
};

use crate::infrastructure::lock_credentials;

/// Pairing-code namespace used when no relay owner is configured.
const LOCAL_OWNER: &str = "local";

pub fn local_target(ws_port: u16) -> String {
    format!("ws://127.0.0.1:{ws_port}")
}

/// Builds the connect request for the local surface with a freshly issued
/// token.
pub fn local_request(credentials: &Mutex<CredentialStore>, ws_port: u16) -> ConnectRequest {
    let token = lock_credentials(credentials).issue_token();
    ConnectRequest {
        side: Side::Host,
        hints: TargetHints {
            explicit: Some(local_target(ws_port)),
            ..TargetHints::default()
        },
        token: token.value,
        relay_available: false,
    }
}

/// Connects the local surface through `router`.
///
/// Returns `None` when the router gave up; the reason has already been
/// logged.
pub async fn connect_local<C: Connector>(
    router: &TransportRouter<C>,
    credentials: Arc<Mutex<CredentialStore>>,
    ws_port: u16,
    owner: Option<&OwnerId>,
) -> Option<C::Link> {
    let request = local_request(&credentials, ws_port);
    let owner = owner
        .cloned()
        .unwrap_or_else(|| OwnerId::new(LOCAL_OWNER));

    let reissue = move || {
        let code = lock_credentials(&credentials).issue_pairing_code(owner.clone());
        info!(code = %redact(&code.value), "re-issued pairing code for the local surface");
    };

    match router.establish(request, reissue).await {
        Established::Direct(link) => Some(link),
        Established::Unavailable(e)
        | Established::RepairRequired(e)
        | Established::Unreachable(e) => {
            debug!("local surface not connected: {e}");
            None
        }
        Established::Relay => None,
    }
}

/// Connects the local surface, declares the host role and holds the link
/// open until the server closes it.
///
/// # Errors
///
/// Returns an error if the link closes before the role could be declared.
pub async fn run_local_link(
    credentials: Arc<Mutex<CredentialStore>>,
    ws_port: u16,
    owner: Option<OwnerId>,
) -> anyhow::Result<()> {
    let router = TransportRouter::new(WsConnector::new());
    let Some(mut link) = connect_local(&router, credentials, ws_port, owner.as_ref()).await else {
        return Ok(());
    };

    link.send(Command::SetRole {
        role: DeviceRole::Host,
        owner_id: owner,
    })
    .await
    .context("local link closed before the host role was declared")?;
    info!("local control surface connected");

    while let Some(cmd) = link.recv().await {
        debug!("local surface received {}", cmd.type_name());
    }

    info!("local control surface disconnected");
    Ok(())
}
