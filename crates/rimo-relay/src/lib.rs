//! rimo-relay library crate.
//!
//! The relay service is the meeting point for a controller and a host that
//! cannot reach each other directly.  Both connect out to it; it keeps, per
//! owner identity:
//!
//! - the ordered command log the controller appends to and the host drains;
//! - the latest-frame slot the host overwrites while mirroring over the
//!   relay;
//! - the host's connection record (address, token, pairing code).
//!
//! ```text
//! rimo-controller ──► RemoteRelayStore ─┐
//!                                       ├─► [rimo-relay] MemoryRelayStore
//! rimo-host ────────► RemoteRelayStore ─┘
//! ```
//!
//! The wire format lives in [`rimo_link::remote`] so the client and the
//! service cannot drift apart.

/// Service configuration.
pub mod config;

/// WebSocket accept loop and request handling.
pub mod server;
