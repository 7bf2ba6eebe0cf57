//! # rimo-core
//!
//! Shared library for Rimo containing the command protocol, the ephemeral
//! credential store, session domain types, and the sender-side gesture
//! classifier.
//!
//! This crate is used by the host service, the controller, and the transport
//! crate.  It has zero dependencies on OS APIs, sockets, or async runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! Rimo pairs a *host* (a desktop whose pointer and keyboard are driven
//! remotely, and whose screen can be mirrored) with a *controller* (usually a
//! phone).  The two talk over either a direct WebSocket channel or, when that
//! cannot be reached, an asynchronous relay log.
//!
//! - **`protocol`** – The one command schema carried by both transports.
//!   Every command is a JSON object with a `"type"` discriminator; in Rust it
//!   is the closed sum type [`Command`].
//!
//! - **`credentials`** – Connection tokens and pairing codes with fixed
//!   lifetimes, behind a [`CredentialStore`] driven by an injectable
//!   [`Clock`] so expiry can be tested deterministically.
//!
//! - **`domain`** – Device roles, connection identifiers, owner identities.
//!
//! - **`gesture`** – Turns raw touch samples into discrete commands on the
//!   *sending* side (tap → click, two-finger drag → scroll).

pub mod credentials;
pub mod domain;
pub mod gesture;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `rimo_core::Command` instead of `rimo_core::protocol::commands::Command`.
pub use credentials::{
    Clock, CredentialError, CredentialStore, ManualClock, PairingCode, SystemClock, Token,
    SAME_MACHINE_TOKEN,
};
pub use domain::device::{ConnectionId, DeviceRole, DeviceSummary, OwnerId, TransportKind};
pub use protocol::codec::{decode_command, encode_command, ProtocolError};
pub use protocol::commands::{Command, Route};
