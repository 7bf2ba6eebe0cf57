//! rimo-controller library crate.
//!
//! A headless controller.  It does what the phone UI does, minus the UI:
//!
//! 1. Loads the remembered token and host address ([`cache`]).
//! 2. Connects through the [`TransportRouter`](rimo_link::TransportRouter)
//!    as the `controller` side ([`session::connect`]).  A rejected token is
//!    discarded and the user is asked to pair again; an unreachable host
//!    falls back to the relay log when an owner identity and a relay service
//!    are known.  With an owner, the host's published connection record can
//!    supply the address (and, given the pairing code, the token).
//! 3. Turns input lines into commands ([`input`]), including scripted touch
//!    sequences run through the gesture classifier.
//! 4. Reports its own battery to the host every few seconds ([`status`]).
//! 5. On the relay path, watches the host's latest-frame slot ([`frames`]).

/// Remembered token and host address.
pub mod cache;

pub mod frames;

/// Stdin lines → commands.
pub mod input;

/// Connecting and sending over whichever path was established.
pub mod session;

/// Periodic `mobile-to-pc` status reports.
pub mod status;
