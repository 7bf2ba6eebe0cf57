//! Registry of live connections and their declared roles.
//!
//! # Lifecycle of a device
//!
//! ```text
//! connect()  ──► role = unset  ──register()──►  role = host | controller
//!     │                                               │
//!     └──────────────── unregister() ◄────────────────┘
//! ```
//!
//! Every `register` and `unregister` fans a fresh `devices-list` out to every
//! connected device, each list excluding the recipient itself.  `unregister`
//! also tells the remaining devices which id left so they can drop any view
//! pointing at it.
//!
//! Delivery uses `try_send` on each device's bounded outbound queue: a peer
//! whose queue is full misses that message instead of stalling everyone else.

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use rimo_core::{Command, ConnectionId, DeviceRole, DeviceSummary, OwnerId, TransportKind};

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::Sender<Command>;

/// One live connection.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: ConnectionId,
    pub role: Option<DeviceRole>,
    pub owner: Option<OwnerId>,
    pub transport: TransportKind,
    outbound: Outbound,
    connected_seq: u64,
}

impl Device {
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }
}

/// Table of every connected device.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    devices: HashMap<ConnectionId, Device>,
    next_seq: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a freshly accepted connection with no role yet.
    pub fn connect(&mut self, id: ConnectionId, transport: TransportKind, outbound: Outbound) {
        let connected_seq = self.next_seq;
        self.next_seq += 1;
        self.devices.insert(
            id,
            Device {
                id,
                role: None,
                owner: None,
                transport,
                outbound,
                connected_seq,
            },
        );
        debug!(%id, ?transport, "device connected");
    }

    /// Declares (or re-declares) a device's role and owner, then fans out the
    /// device lists.  Returns `false` for an unknown connection.
    pub fn register(&mut self, id: ConnectionId, role: DeviceRole, owner: Option<OwnerId>) -> bool {
        let Some(device) = self.devices.get_mut(&id) else {
            return false;
        };
        device.role = Some(role);
        if owner.is_some() {
            device.owner = owner;
        }
        info!(%id, %role, "device registered");
        self.broadcast_device_lists();
        true
    }

    /// Removes a device, tells the others it left, and fans out the lists.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Device> {
        let removed = self.devices.remove(&id)?;
        info!(%id, "device left");
        self.broadcast_except(id, &Command::DeviceLeft { id });
        self.broadcast_device_lists();
        Some(removed)
    }

    /// Registered devices other than `excluding`, in connection order.
    pub fn list_devices(&self, excluding: ConnectionId) -> Vec<DeviceSummary> {
        let mut peers: Vec<&Device> = self
            .devices
            .values()
            .filter(|d| d.id != excluding && d.role.is_some())
            .collect();
        peers.sort_by_key(|d| d.connected_seq);
        peers
            .into_iter()
            .filter_map(|d| d.role.map(|role| DeviceSummary { id: d.id, role }))
            .collect()
    }

    /// Sends every connected device the list of its peers.
    pub fn broadcast_device_lists(&self) {
        for device in self.devices.values() {
            let devices = self.list_devices(device.id);
            deliver(device, Command::DevicesList { devices });
        }
    }

    /// Sends `cmd` to every device except `sender`; returns how many queues
    /// accepted it.
    pub fn broadcast_except(&self, sender: ConnectionId, cmd: &Command) -> usize {
        self.devices
            .values()
            .filter(|d| d.id != sender)
            .filter(|d| deliver(d, cmd.clone()))
            .count()
    }

    /// Sends `cmd` to one device.
    pub fn send_to(&self, id: ConnectionId, cmd: Command) -> bool {
        self.devices.get(&id).is_some_and(|d| deliver(d, cmd))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn deliver(device: &Device, cmd: Command) -> bool {
    match device.outbound.try_send(cmd) {
        Ok(()) => true,
        Err(TrySendError::Full(cmd)) => {
            debug!(id = %device.id, "outbound queue full; dropping {}", cmd.type_name());
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
