//! The asynchronous relay path.
//!
//! # Model
//!
//! Each owner identity has:
//!
//! - an ordered **log** of pending commands.  Writers append; a subscriber
//!   receives each entry (the backlog first, then live appends), executes it,
//!   and deletes it.  Keys increase with append order, which is the only
//!   ordering hint: entries from different writers interleave in whatever
//!   order their appends reached the store.
//! - a single **latest frame** slot.  Publishing overwrites it; there is no
//!   history.
//! - a single **connection record**: the host's current address, token and
//!   pairing code, so a controller on another network can find it.
//!
//! # Delivery
//!
//! Every entry is handed to exactly one live subscriber, the oldest one.
//! When that subscriber goes away before deleting the entry, the entry is
//! handed out again to the next subscriber.  Several host surfaces (or host
//! processes) draining the same owner therefore never execute one entry
//! twice while they are all alive.
//!
//! [`RelayStore`] is the seam to the backing store.  [`MemoryRelayStore`]
//! keeps everything in one process; it backs the relay service and the
//! tests.  [`RemoteRelayStore`](crate::remote::RemoteRelayStore) reaches a
//! relay service over WebSocket.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use rimo_core::{Command, OwnerId};

/// One pending command in an owner's log.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayEntry {
    /// Append-order key, unique within the owner's log.
    pub key: u64,
    pub command: Command,
}

/// Where an owner's host can currently be reached.
///
/// Published by the host whenever it registers a pairing code.  A
/// controller that knows the owner and the code can adopt the token and
/// address without reaching the host's pairing API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub pairing_code: String,
    pub token: String,
    /// Real-time channel address, e.g. `ws://192.168.1.20:3001`.
    pub server: String,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

impl ConnectionRecord {
    /// Pairing codes compare case-insensitively.
    pub fn matches_code(&self, candidate: &str) -> bool {
        self.pairing_code.eq_ignore_ascii_case(candidate.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The backing store could not be reached.
    #[error("relay store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but refused the request.
    #[error("relay store refused the request: {0}")]
    Refused(String),
}

/// Storage for per-owner command logs and frame slots.
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Appends `command` to `owner`'s log and returns its key.
    async fn append(&self, owner: &OwnerId, command: Command) -> Result<u64, RelayError>;

    /// Streams pending entries of `owner`'s log in key order, then entries
    /// appended later.  Each entry goes to one subscriber only; see the
    /// module docs.  The subscription ends when the receiver is dropped.
    async fn subscribe(
        &self,
        owner: &OwnerId,
    ) -> Result<mpsc::UnboundedReceiver<RelayEntry>, RelayError>;

    /// Removes one entry.  Deleting an absent key is not an error.
    async fn delete(&self, owner: &OwnerId, key: u64) -> Result<(), RelayError>;

    /// Overwrites `owner`'s latest-frame slot.
    async fn publish_frame(&self, owner: &OwnerId, blob: String) -> Result<(), RelayError>;

    async fn latest_frame(&self, owner: &OwnerId) -> Result<Option<String>, RelayError>;

    /// Overwrites `owner`'s connection record.
    async fn publish_connection(
        &self,
        owner: &OwnerId,
        record: ConnectionRecord,
    ) -> Result<(), RelayError>;

    async fn connection(&self, owner: &OwnerId) -> Result<Option<ConnectionRecord>, RelayError>;
}

// ── In-memory store ───────────────────────────────────────────────────────────

struct PendingEntry {
    command: Command,
    /// Subscriber the entry was handed to, if any.
    claimed_by: Option<u64>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<RelayEntry>,
}

#[derive(Default)]
struct OwnerLog {
    next_key: u64,
    next_subscriber: u64,
    entries: BTreeMap<u64, PendingEntry>,
    /// Oldest first.
    subscribers: Vec<Subscriber>,
    frame: Option<String>,
    connection: Option<ConnectionRecord>,
}

impl OwnerLog {
    fn prune(&mut self) {
        self.subscribers.retain(|s| !s.tx.is_closed());
    }

    /// Hands every entry no live subscriber holds to the oldest live one,
    /// in key order.
    fn reclaim(&mut self) {
        self.prune();
        let Some(oldest) = self.subscribers.first() else {
            return;
        };
        let live: Vec<u64> = self.subscribers.iter().map(|s| s.id).collect();
        for (&key, entry) in self.entries.iter_mut() {
            if entry.claimed_by.is_some_and(|c| live.contains(&c)) {
                continue;
            }
            let handed = oldest.tx.send(RelayEntry {
                key,
                command: entry.command.clone(),
            });
            if handed.is_ok() {
                entry.claimed_by = Some(oldest.id);
            }
        }
    }

    /// Hands a new entry to the oldest live subscriber; returns who took it.
    fn dispatch(&mut self, key: u64, command: &Command) -> Option<u64> {
        self.prune();
        let entry = RelayEntry {
            key,
            command: command.clone(),
        };
        self.subscribers
            .iter()
            .find(|s| s.tx.send(entry.clone()).is_ok())
            .map(|s| s.id)
    }
}

/// Process-local [`RelayStore`].
#[derive(Default)]
pub struct MemoryRelayStore {
    logs: Mutex<HashMap<OwnerId, OwnerLog>>,
}

impl MemoryRelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys still present in `owner`'s log.
    pub fn pending_keys(&self, owner: &OwnerId) -> Vec<u64> {
        self.lock()
            .get(owner)
            .map(|log| log.entries.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of live subscribers on `owner`'s log.
    pub fn subscriber_count(&self, owner: &OwnerId) -> usize {
        self.lock()
            .get_mut(owner)
            .map(|log| {
                log.prune();
                log.subscribers.len()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<OwnerId, OwnerLog>> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RelayStore for MemoryRelayStore {
    async fn append(&self, owner: &OwnerId, command: Command) -> Result<u64, RelayError> {
        let mut logs = self.lock();
        let log = logs.entry(owner.clone()).or_default();
        let key = log.next_key;
        log.next_key += 1;

        log.reclaim();
        let claimed_by = log.dispatch(key, &command);
        log.entries.insert(key, PendingEntry { command, claimed_by });
        debug!(%owner, key, delivered = claimed_by.is_some(), "relay entry appended");
        Ok(key)
    }

    async fn subscribe(
        &self,
        owner: &OwnerId,
    ) -> Result<mpsc::UnboundedReceiver<RelayEntry>, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut logs = self.lock();
        let log = logs.entry(owner.clone()).or_default();
        let id = log.next_subscriber;
        log.next_subscriber += 1;
        log.subscribers.push(Subscriber { id, tx });
        // Backlog nobody alive is holding goes to the oldest live subscriber,
        // which is this one unless another is already draining.
        log.reclaim();
        Ok(rx)
    }

    async fn delete(&self, owner: &OwnerId, key: u64) -> Result<(), RelayError> {
        if let Some(log) = self.lock().get_mut(owner) {
            log.entries.remove(&key);
        }
        Ok(())
    }

    async fn publish_frame(&self, owner: &OwnerId, blob: String) -> Result<(), RelayError> {
        self.lock().entry(owner.clone()).or_default().frame = Some(blob);
        Ok(())
    }

    async fn latest_frame(&self, owner: &OwnerId) -> Result<Option<String>, RelayError> {
        Ok(self.lock().get(owner).and_then(|log| log.frame.clone()))
    }

    async fn publish_connection(
        &self,
        owner: &OwnerId,
        record: ConnectionRecord,
    ) -> Result<(), RelayError> {
        self.lock().entry(owner.clone()).or_default().connection = Some(record);
        Ok(())
    }

    async fn connection(&self, owner: &OwnerId) -> Result<Option<ConnectionRecord>, RelayError> {
        Ok(self.lock().get(owner).and_then(|log| log.connection.clone()))
    }
}

// ── Sender ────────────────────────────────────────────────────────────────────

/// Controller-side handle that writes commands into one owner's log.
#[derive(Clone)]
pub struct RelaySender {
    store: Arc<dyn RelayStore>,
    owner: OwnerId,
}

impl RelaySender {
    pub fn new(store: Arc<dyn RelayStore>, owner: OwnerId) -> Self {
        Self { store, owner }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub async fn send(&self, command: Command) -> Result<u64, RelayError> {
        self.store.append(&self.owner, command).await
    }

    /// Reads the most recent frame the host published, if any.
    pub async fn latest_frame(&self) -> Result<Option<String>, RelayError> {
        self.store.latest_frame(&self.owner).await
    }

    /// Reads the host's published connection record, if any.
    pub async fn connection(&self) -> Result<Option<ConnectionRecord>, RelayError> {
        self.store.connection(&self.owner).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
