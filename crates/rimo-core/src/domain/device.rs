//! Device identity and role types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one live transport connection.
///
/// A fresh v4 UUID is minted by the host service every time a connection is
/// accepted; it is never reused after disconnect.
pub type ConnectionId = Uuid;

/// Opaque subject identifier produced by the identity provider.
///
/// Used both as the owner of a pairing code and as the namespace of the
/// relay log.  The string content is never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wraps a subject identifier.
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// Returns the raw subject string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role a device declares after connecting.
///
/// A device that has not declared a role yet is represented as
/// `Option<DeviceRole>::None` by the session registry.
///
/// The wire names are `"host"` and `"controller"`; the older `"pc"` and
/// `"mobile"` spellings are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    /// The desktop being controlled.
    #[serde(alias = "pc")]
    Host,
    /// The device issuing commands.
    #[serde(alias = "mobile")]
    Controller,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Controller => f.write_str("controller"),
        }
    }
}

/// Which transport a device arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Low-latency WebSocket channel.
    Direct,
    /// Asynchronous store-and-forward relay log.
    Relay,
}

/// One entry of the `devices-list` fan-out payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: ConnectionId,
    pub role: DeviceRole,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
