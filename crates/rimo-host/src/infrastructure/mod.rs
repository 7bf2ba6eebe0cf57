//! Infrastructure layer: everything that touches sockets, files or the OS.
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `ws_server`  | direct real-time channel, token handshake             |
//! | `http_api`   | pairing bootstrap endpoints                           |
//! | `identity`   | bearer token → owner id                               |
//! | `net_info`   | LAN addresses advertised to controllers               |
//! | `local_link` | the host's own connection to its control surface      |
//! | `settings`   | TOML settings file                                    |
//! | `platform`   | input, capture and metrics capabilities               |

use std::sync::{Mutex, MutexGuard};

use rimo_core::CredentialStore;

pub mod http_api;
pub mod identity;
pub mod local_link;
pub mod net_info;
pub mod platform;
pub mod settings;
pub mod ws_server;

/// Locks the shared credential store.
///
/// A panic while holding the lock cannot leave the store half-updated, so a
/// poisoned lock is recovered rather than propagated.
pub fn lock_credentials(store: &Mutex<CredentialStore>) -> MutexGuard<'_, CredentialStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
