//! Connecting as a controller and sending over the established path.
//!
//! ```text
//! connect()
//!   ├─ no token            → PairingRequired
//!   ├─ Direct(link)        → set-role controller, get-displays → Connected
//!   ├─ Relay               → Connected (commands go to the owner's log)
//!   ├─ RepairRequired      → token discarded → PairingRequired
//!   └─ Unreachable         → Unreachable ("try again")
//! ```
//!
//! Before connecting, a controller that knows its owner identity may read
//! the host's published [`ConnectionRecord`](rimo_link::ConnectionRecord)
//! ([`apply_connection_record`]).

use rimo_core::{Command, DeviceRole, OwnerId, TransportKind};
use rimo_link::{
    ConnectError, ConnectRequest, Connector, DirectLink, Established, RelayError, RelaySender,
    Side, TargetHints, TransportRouter,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::CredentialCache;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("direct link closed")]
    Closed,

    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// The part of a direct link the session needs to send.
pub trait Duplex: Send + 'static {
    fn outbound(&self) -> mpsc::Sender<Command>;
}

impl Duplex for DirectLink {
    fn outbound(&self) -> mpsc::Sender<Command> {
        self.sender()
    }
}

/// Cheap, cloneable handle that sends over whichever path was established.
#[derive(Clone)]
pub enum SessionSender {
    Direct(mpsc::Sender<Command>),
    Relay(RelaySender),
}

impl SessionSender {
    pub fn transport(&self) -> TransportKind {
        match self {
            Self::Direct(_) => TransportKind::Direct,
            Self::Relay(_) => TransportKind::Relay,
        }
    }

    pub async fn send(&self, cmd: Command) -> Result<(), SessionError> {
        match self {
            Self::Direct(tx) => tx.send(cmd).await.map_err(|_| SessionError::Closed),
            Self::Relay(relay) => {
                relay.send(cmd).await?;
                Ok(())
            }
        }
    }
}

/// An established session.  `link` is `Some` on the direct path and carries
/// everything the host pushes back.
pub struct ControllerSession<L> {
    pub sender: SessionSender,
    pub link: Option<L>,
}

/// Result of [`connect`].
pub enum ConnectOutcome<L> {
    Connected(ControllerSession<L>),
    /// No usable token; the user must pair (again).
    PairingRequired,
    /// The host cannot be reached and no relay identity is known.
    Unreachable(ConnectError),
}

/// Where and as whom to connect.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Address from a flag or a scanned QR code.
    pub server: Option<String>,
    /// Relay-capable owner identity.
    pub owner: Option<OwnerId>,
}

/// Connects as a controller, applying the controller fallback rules.
///
/// `relay` must be `Some` for the relay fallback to be offered; it is used
/// only if the direct channel is unreachable.
pub async fn connect<C>(
    router: &TransportRouter<C>,
    cache: &mut CredentialCache,
    options: &ConnectOptions,
    relay: Option<RelaySender>,
) -> ConnectOutcome<C::Link>
where
    C: Connector,
    C::Link: Duplex,
{
    let Some(token) = cache.token().map(str::to_owned) else {
        return ConnectOutcome::PairingRequired;
    };
    let hints = TargetHints {
        explicit: options.server.clone(),
        remembered: cache.server().map(str::to_owned),
        same_origin: None,
    };
    let target = hints.resolve();
    let request = ConnectRequest {
        side: Side::Controller,
        hints,
        token,
        relay_available: relay.is_some(),
    };

    match router.establish(request, || {}).await {
        Established::Direct(link) => {
            cache.remember_server(target);
            let sender = SessionSender::Direct(link.outbound());
            let hello = [
                Command::SetRole {
                    role: DeviceRole::Controller,
                    owner_id: options.owner.clone(),
                },
                Command::GetDisplays {},
            ];
            for cmd in hello {
                if let Err(e) = sender.send(cmd).await {
                    warn!("direct link closed during registration: {e}");
                }
            }
            info!("connected over the direct channel");
            ConnectOutcome::Connected(ControllerSession {
                sender,
                link: Some(link),
            })
        }
        Established::Relay => over_relay(relay),
        Established::RepairRequired(_) => {
            cache.discard_token();
            ConnectOutcome::PairingRequired
        }
        Established::Unreachable(e) | Established::Unavailable(e) => ConnectOutcome::Unreachable(e),
    }
}

/// Session over the relay log, or `Unreachable` when there is no relay
/// handle to send through.
fn over_relay<L>(relay: Option<RelaySender>) -> ConnectOutcome<L> {
    match relay {
        Some(relay) => {
            info!(owner = %relay.owner(), "connected over the relay log");
            ConnectOutcome::Connected(ControllerSession {
                sender: SessionSender::Relay(relay),
                link: None,
            })
        }
        None => ConnectOutcome::Unreachable(ConnectError::Unreachable(
            "host unreachable and no relay identity".into(),
        )),
    }
}

/// What [`apply_connection_record`] did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The host has not published a record for this owner.
    Missing,
    /// The code matched: token and address adopted.
    Adopted,
    /// A code was given and it is not the one the host registered.
    CodeMismatch,
    /// No code given: only the address was taken, as the remembered one.
    AddressOnly,
}

/// Reads the owner's connection record and applies it to `cache`.
///
/// With a pairing `code`, a matching record supplies both token and
/// address; a mismatching one changes nothing.  Without a code only the
/// address is taken.
pub async fn apply_connection_record(
    cache: &mut CredentialCache,
    relay: &RelaySender,
    code: Option<&str>,
) -> Result<RecordOutcome, RelayError> {
    let Some(record) = relay.connection().await? else {
        return Ok(RecordOutcome::Missing);
    };

    match code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) if record.matches_code(code) => {
            info!(owner = %relay.owner(), "pairing code matched the published record");
            cache.set_token(record.token);
            cache.remember_server(record.server);
            Ok(RecordOutcome::Adopted)
        }
        Some(_) => {
            warn!(owner = %relay.owner(), "pairing code does not match the published record");
            Ok(RecordOutcome::CodeMismatch)
        }
        None => {
            debug!(owner = %relay.owner(), server = %record.server, "host address taken from published record");
            cache.remember_server(record.server);
            Ok(RecordOutcome::AddressOnly)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StoredCredentials;
    use async_trait::async_trait;
    use rimo_link::{ConnectionRecord, MemoryRelayStore, RelayStore};
    use std::sync::{Arc, Mutex};

    struct FakeLink(mpsc::Sender<Command>);

    impl Duplex for FakeLink {
        fn outbound(&self) -> mpsc::Sender<Command> {
            self.0.clone()
        }
    }

    /// Answers every attempt with one fixed outcome.
    struct FixedConnector {
        outcome: Result<(), ConnectError>,
        link_tx: mpsc::Sender<Command>,
        targets: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Connector for FixedConnector {
        type Link = FakeLink;

        async fn connect(&self, target: &str, _token: &str) -> Result<FakeLink, ConnectError> {
            self.targets.lock().unwrap().push(target.to_string());
            self.outcome
                .clone()
                .map(|()| FakeLink(self.link_tx.clone()))
        }
    }

    fn router(outcome: Result<(), ConnectError>) -> (TransportRouter<FixedConnector>, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(16);
        let connector = FixedConnector {
            outcome,
            link_tx: tx,
            targets: Mutex::new(Vec::new()),
        };
        (TransportRouter::new(connector), rx)
    }

    fn cache_with_token() -> CredentialCache {
        CredentialCache::in_memory(StoredCredentials {
            token: Some("1a2b3c4d".into()),
            server: Some("192.168.1.20:3001".into()),
        })
    }

    fn owner() -> OwnerId {
        OwnerId::new("ana@example.com")
    }

    #[tokio::test]
    async fn test_direct_connect_registers_and_asks_for_displays() {
        // Arrange
        let (router, mut host_rx) = router(Ok(()));
        let mut cache = cache_with_token();
        let options = ConnectOptions {
            server: None,
            owner: Some(owner()),
        };

        // Act
        let outcome = connect(&router, &mut cache, &options, None).await;

        // Assert
        assert!(matches!(outcome, ConnectOutcome::Connected(ref s) if s.link.is_some()));
        assert_eq!(
            host_rx.recv().await,
            Some(Command::SetRole {
                role: DeviceRole::Controller,
                owner_id: Some(owner()),
            })
        );
        assert_eq!(host_rx.recv().await, Some(Command::GetDisplays {}));
        assert_eq!(cache.server(), Some("ws://192.168.1.20:3001"));
    }

    #[tokio::test]
    async fn test_explicit_server_beats_remembered() {
        let (router, _rx) = router(Ok(()));
        let mut cache = cache_with_token();
        let options = ConnectOptions {
            server: Some("10.0.0.9:3001".into()),
            owner: None,
        };

        let _ = connect(&router, &mut cache, &options, None).await;

        let targets = router.connector().targets.lock().unwrap().clone();
        assert_eq!(targets, vec!["ws://10.0.0.9:3001".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_token_is_discarded_without_retry() {
        // Arrange
        let (router, _rx) = router(Err(ConnectError::Rejected("APP_AUTH_RETRY_V1".into())));
        let mut cache = cache_with_token();

        // Act
        let outcome = connect(&router, &mut cache, &ConnectOptions::default(), None).await;

        // Assert
        assert!(matches!(outcome, ConnectOutcome::PairingRequired));
        assert_eq!(cache.token(), None);
        assert_eq!(router.connector().targets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_falls_back_to_relay_with_owner() {
        // Arrange
        let (router, _rx) = router(Err(ConnectError::Unreachable("refused".into())));
        let mut cache = cache_with_token();
        let store = Arc::new(MemoryRelayStore::new());
        let relay = RelaySender::new(store.clone(), owner());

        // Act
        let outcome = connect(&router, &mut cache, &ConnectOptions::default(), Some(relay)).await;

        // Assert
        let ConnectOutcome::Connected(session) = outcome else {
            panic!("expected relay session");
        };
        assert_eq!(session.sender.transport(), TransportKind::Relay);
        session
            .sender
            .send(Command::MouseScroll { dy: 1.0 })
            .await
            .unwrap();
        assert_eq!(store.pending_keys(&owner()).len(), 1);
        assert_eq!(cache.token(), Some("1a2b3c4d"));
    }

    #[tokio::test]
    async fn test_unreachable_host_without_relay_reports_unreachable() {
        let (router, _rx) = router(Err(ConnectError::Unreachable("refused".into())));
        let mut cache = cache_with_token();

        let outcome = connect(&router, &mut cache, &ConnectOptions::default(), None).await;

        assert!(matches!(outcome, ConnectOutcome::Unreachable(_)));
        assert_eq!(cache.token(), Some("1a2b3c4d"));
    }

    #[test]
    fn test_relay_path_without_relay_handle_is_unreachable() {
        let outcome: ConnectOutcome<FakeLink> = over_relay(None);

        assert!(matches!(
            outcome,
            ConnectOutcome::Unreachable(ConnectError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_token_needs_pairing_before_any_attempt() {
        let (router, _rx) = router(Ok(()));
        let mut cache = CredentialCache::default();

        let outcome = connect(&router, &mut cache, &ConnectOptions::default(), None).await;

        assert!(matches!(outcome, ConnectOutcome::PairingRequired));
        assert!(router.connector().targets.lock().unwrap().is_empty());
    }

    /// A relay handle whose owner has published a record for code `AB12CD`.
    async fn published_record() -> RelaySender {
        let store = Arc::new(MemoryRelayStore::new());
        store
            .publish_connection(
                &owner(),
                ConnectionRecord {
                    pairing_code: "AB12CD".into(),
                    token: "9f8e7d6c".into(),
                    server: "ws://10.0.0.4:3001".into(),
                    updated_at: 1,
                },
            )
            .await
            .unwrap();
        RelaySender::new(store, owner())
    }

    #[tokio::test]
    async fn test_matching_code_adopts_token_and_address() {
        // Arrange
        let relay = published_record().await;
        let mut cache = CredentialCache::default();

        // Act
        let outcome = apply_connection_record(&mut cache, &relay, Some(" ab12cd "))
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome, RecordOutcome::Adopted);
        assert_eq!(cache.token(), Some("9f8e7d6c"));
        assert_eq!(cache.server(), Some("ws://10.0.0.4:3001"));
    }

    #[tokio::test]
    async fn test_wrong_code_leaves_cache_alone() {
        let relay = published_record().await;
        let mut cache = cache_with_token();

        let outcome = apply_connection_record(&mut cache, &relay, Some("ZZZZZZ"))
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::CodeMismatch);
        assert_eq!(cache.token(), Some("1a2b3c4d"));
        assert_eq!(cache.server(), Some("192.168.1.20:3001"));
    }

    #[tokio::test]
    async fn test_record_address_becomes_remembered_target() {
        // Arrange
        let relay = published_record().await;
        let mut cache = cache_with_token();
        let (router, _rx) = router(Ok(()));

        // Act
        let outcome = apply_connection_record(&mut cache, &relay, None).await.unwrap();
        let _ = connect(&router, &mut cache, &ConnectOptions::default(), None).await;

        // Assert
        assert_eq!(outcome, RecordOutcome::AddressOnly);
        assert_eq!(cache.token(), Some("1a2b3c4d"));
        let targets = router.connector().targets.lock().unwrap().clone();
        assert_eq!(targets, vec!["ws://10.0.0.4:3001".to_string()]);
    }

    #[tokio::test]
    async fn test_no_published_record_is_missing() {
        let relay = RelaySender::new(Arc::new(MemoryRelayStore::new()), owner());
        let mut cache = CredentialCache::default();

        let outcome = apply_connection_record(&mut cache, &relay, Some("AB12CD"))
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::Missing);
        assert_eq!(cache.stored(), &StoredCredentials::default());
    }

    #[tokio::test]
    async fn test_relay_latest_frame_is_readable_through_sender() {
        let store = Arc::new(MemoryRelayStore::new());
        store.publish_frame(&owner(), "data:image/jpeg;base64,AA".into()).await.unwrap();
        let relay = RelaySender::new(store, owner());
        assert_eq!(
            relay.latest_frame().await.unwrap().as_deref(),
            Some("data:image/jpeg;base64,AA")
        );
    }
}
