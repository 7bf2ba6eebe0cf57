//! Host side of the relay path.
//!
//! While at least one host connection is registered with a known owner, a
//! single [`RelayListener`] drains that owner's relay log:
//!
//! 1. receive the next entry (backlog first, then live appends);
//! 2. act on it: input commands go through [`CommandChannel`], and
//!    `start-mirroring`/`stop-mirroring` drive a capture loop whose frames
//!    land in the owner's latest-frame slot;
//! 3. delete the entry, whether or not step 2 succeeded.
//!
//! Deletion strictly follows execution.  A crash between the two leaves the
//! entry in the log, and it runs again when the next listener subscribes.
//!
//! Dropping the listener aborts its task, which also drops its capture loop
//! and with it any relay-mode mirroring.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rimo_core::{Command, ConnectionId, OwnerId, Route};
use rimo_link::{RelayEntry, RelayStore};

use crate::application::capture_loop::{CaptureLoop, FrameSink, ScreenCapture};
use crate::application::command_channel::CommandChannel;
use crate::application::task::TaskGuard;

/// Key of the single relay-mode mirror session inside a listener.
pub const RELAY_MIRROR_KEY: ConnectionId = Uuid::nil();

/// Publishes frames to an owner's latest-frame slot.
pub struct RelayFrameSink {
    store: Arc<dyn RelayStore>,
    owner: OwnerId,
}

impl RelayFrameSink {
    pub fn new(store: Arc<dyn RelayStore>, owner: OwnerId) -> Self {
        Self { store, owner }
    }
}

#[async_trait]
impl FrameSink for RelayFrameSink {
    async fn deliver(&self, blob: String) {
        if let Err(e) = self.store.publish_frame(&self.owner, blob).await {
            debug!(owner = %self.owner, "relay frame not published: {e}");
        }
    }
}

/// Everything a listener needs, shared by all listeners.
#[derive(Clone)]
pub struct RelayBridge {
    store: Arc<dyn RelayStore>,
    channel: Arc<CommandChannel>,
    capture: Arc<dyn ScreenCapture>,
    mirror_interval: Duration,
}

impl RelayBridge {
    pub fn new(
        store: Arc<dyn RelayStore>,
        channel: Arc<CommandChannel>,
        capture: Arc<dyn ScreenCapture>,
        mirror_interval: Duration,
    ) -> Self {
        Self {
            store,
            channel,
            capture,
            mirror_interval,
        }
    }

    /// Subscribes to `owner`'s log on a new task.
    pub fn listen(&self, owner: OwnerId) -> RelayListener {
        let bridge = self.clone();
        let task_owner = owner.clone();
        let task = TaskGuard::spawn(async move {
            let mut entries = match bridge.store.subscribe(&task_owner).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(owner = %task_owner, "relay subscription failed: {e}");
                    return;
                }
            };
            info!(owner = %task_owner, "relay listener subscribed");
            let mut mirror = CaptureLoop::new(Arc::clone(&bridge.capture));
            while let Some(entry) = entries.recv().await {
                bridge.handle_entry(&task_owner, entry, &mut mirror).await;
            }
            debug!(owner = %task_owner, "relay log closed");
        });
        RelayListener { owner, task }
    }

    /// Acts on one entry, then deletes it.
    pub async fn handle_entry(&self, owner: &OwnerId, entry: RelayEntry, mirror: &mut CaptureLoop) {
        let cmd = &entry.command;
        debug!(%owner, key = entry.key, "relay entry: {}", cmd.type_name());

        match (cmd.route(), cmd) {
            (Route::ExecuteOnHost, _) => {
                if let Err(e) = self.channel.execute(cmd).await {
                    warn!("relay {} not executed: {e}", cmd.type_name());
                }
            }
            (_, Command::StartMirroring { display_id }) => {
                let sink = Arc::new(RelayFrameSink::new(Arc::clone(&self.store), owner.clone()));
                mirror.start(RELAY_MIRROR_KEY, *display_id, self.mirror_interval, sink);
            }
            (_, Command::StopMirroring {}) => {
                mirror.stop(RELAY_MIRROR_KEY);
            }
            _ => debug!("relay entry {} has no host-side effect", cmd.type_name()),
        }

        if let Err(e) = self.store.delete(owner, entry.key).await {
            warn!(%owner, key = entry.key, "relay entry not deleted: {e}");
        }
    }
}

/// A running subscription to one owner's log.
pub struct RelayListener {
    owner: OwnerId,
    task: TaskGuard,
}

impl RelayListener {
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::platform::mock::{InputCall, MockInputExecutor, MockScreenCapture};
    use rimo_link::MemoryRelayStore;
    use std::sync::Mutex;

    struct Fixture {
        store: Arc<MemoryRelayStore>,
        executor: Arc<MockInputExecutor>,
        bridge: RelayBridge,
    }

    fn fixture(executor: MockInputExecutor) -> Fixture {
        let store = Arc::new(MemoryRelayStore::new());
        let executor = Arc::new(executor);
        let bridge = RelayBridge::new(
            store.clone(),
            Arc::new(CommandChannel::new(executor.clone(), 1.0)),
            Arc::new(MockScreenCapture::new()),
            Duration::from_millis(100),
        );
        Fixture {
            store,
            executor,
            bridge,
        }
    }

    fn owner() -> OwnerId {
        OwnerId::new("owner-u")
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_entries_execute_in_append_order_then_are_deleted() {
        // Arrange
        let f = fixture(MockInputExecutor::new());
        f.store
            .append(&owner(), Command::MouseScroll { dy: 1.0 })
            .await
            .unwrap();

        // Act
        let _listener = f.bridge.listen(owner());
        f.store
            .append(&owner(), Command::MouseScroll { dy: 2.0 })
            .await
            .unwrap();
        settle().await;

        // Assert
        assert_eq!(
            f.executor.calls(),
            vec![InputCall::Scroll(-1.0), InputCall::Scroll(-2.0)]
        );
        assert!(f.store.pending_keys(&owner()).is_empty());
    }

    #[tokio::test]
    async fn test_entry_is_still_pending_while_executing() {
        let store = Arc::new(MemoryRelayStore::new());
        let seen: Arc<Mutex<Vec<usize>>> = Arc::default();
        let (hook_store, hook_seen) = (store.clone(), seen.clone());
        let executor = Arc::new(MockInputExecutor::with_hook(move || {
            hook_seen
                .lock()
                .unwrap()
                .push(hook_store.pending_keys(&owner()).len());
        }));
        let bridge = RelayBridge::new(
            store.clone(),
            Arc::new(CommandChannel::new(executor.clone(), 1.0)),
            Arc::new(MockScreenCapture::new()),
            Duration::from_millis(100),
        );
        store
            .append(&owner(), Command::KeyTap {
                key: "a".into(),
                modifiers: vec![],
            })
            .await
            .unwrap();

        let _listener = bridge.listen(owner());
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert!(store.pending_keys(&owner()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_execution_still_deletes_entry() {
        let f = fixture(MockInputExecutor::failing());
        f.store
            .append(&owner(), Command::TypeString { text: "x".into() })
            .await
            .unwrap();

        let _listener = f.bridge.listen(owner());
        settle().await;

        assert!(f.store.pending_keys(&owner()).is_empty());
    }

    #[tokio::test]
    async fn test_dropping_listener_unsubscribes() {
        let f = fixture(MockInputExecutor::new());
        let listener = f.bridge.listen(owner());
        settle().await;
        assert_eq!(f.store.subscriber_count(&owner()), 1);

        drop(listener);
        settle().await;
        f.store
            .append(&owner(), Command::MouseScroll { dy: 1.0 })
            .await
            .unwrap();

        assert_eq!(f.store.subscriber_count(&owner()), 0);
        assert!(f.executor.calls().is_empty());
        assert_eq!(f.store.pending_keys(&owner()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_mirroring_writes_latest_frame_slot() {
        let f = fixture(MockInputExecutor::new());
        let _listener = f.bridge.listen(owner());
        f.store
            .append(&owner(), Command::StartMirroring { display_id: 0 })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;

        let frame = f.store.latest_frame(&owner()).await.unwrap();
        assert!(frame.is_some_and(|b| b.starts_with("data:image/jpeg;base64,")));
    }

    #[tokio::test]
    async fn test_forward_only_commands_are_consumed_without_effect() {
        let f = fixture(MockInputExecutor::new());
        let mut mirror = CaptureLoop::new(Arc::new(MockScreenCapture::new()));
        let key = f
            .store
            .append(&owner(), Command::SyncClipboard { text: "x".into() })
            .await
            .unwrap();

        f.bridge
            .handle_entry(
                &owner(),
                RelayEntry {
                    key,
                    command: Command::SyncClipboard { text: "x".into() },
                },
                &mut mirror,
            )
            .await;

        assert!(f.executor.calls().is_empty());
        assert!(f.store.pending_keys(&owner()).is_empty());
    }
}
