//! A controller that cannot reach its host falls back to the relay log, and
//! the host's relay listener executes what it wrote, in order.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;

use rimo_core::protocol::commands::MouseButton;
use rimo_core::{Command, OwnerId, TransportKind};
use rimo_link::{MemoryRelayStore, RelaySender, TransportRouter, WsConnector};

use rimo_controller::cache::{CredentialCache, StoredCredentials};
use rimo_controller::session::{connect, ConnectOptions, ConnectOutcome};

use rimo_host::application::{CommandChannel, RelayBridge};
use rimo_host::infrastructure::platform::mock::{InputCall, MockInputExecutor, MockScreenCapture};

/// An address nobody listens on.
async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

#[tokio::test]
async fn test_unreachable_host_receives_commands_through_relay() {
    // Arrange: host side drains the owner's log.
    let owner = OwnerId::new("ana@example.com");
    let store = Arc::new(MemoryRelayStore::new());
    let executor = Arc::new(MockInputExecutor::new());
    let bridge = RelayBridge::new(
        store.clone(),
        Arc::new(CommandChannel::new(executor.clone(), 1.0)),
        Arc::new(MockScreenCapture::new()),
        Duration::from_millis(80),
    );
    let _listener = bridge.listen(owner.clone());

    // Controller side cannot reach the direct channel.
    let router = TransportRouter::new(WsConnector::new());
    let mut cache = CredentialCache::in_memory(StoredCredentials {
        token: Some("1a2b3c4d".into()),
        server: None,
    });
    let options = ConnectOptions {
        server: Some(dead_address().await),
        owner: Some(owner.clone()),
    };
    let relay = RelaySender::new(store.clone(), owner.clone());

    // Act
    let ConnectOutcome::Connected(session) = connect(&router, &mut cache, &options, Some(relay)).await
    else {
        panic!("expected relay fallback");
    };
    session
        .sender
        .send(Command::MouseClick {
            button: MouseButton::Left,
            double: false,
        })
        .await
        .unwrap();
    session
        .sender
        .send(Command::TypeString { text: "hi".into() })
        .await
        .unwrap();

    // Assert
    assert_eq!(session.sender.transport(), TransportKind::Relay);
    assert!(session.link.is_none());
    timeout(Duration::from_secs(5), async {
        while !store.pending_keys(&owner).is_empty() || executor.calls().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        executor.calls(),
        vec![
            InputCall::Click(MouseButton::Left, false),
            InputCall::Type("hi".into()),
        ]
    );
    // The token was not at fault, so it is kept.
    assert_eq!(cache.token(), Some("1a2b3c4d"));
}
