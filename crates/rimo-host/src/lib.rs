//! rimo-host library crate.
//!
//! The host service: it hands out pairing credentials over HTTP, accepts the
//! direct real-time channel, executes input commands on this machine, mirrors
//! the screen to controllers, and drains the relay log when controllers
//! cannot reach it directly.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Controller (JSON over WebSocket)       Controller (relay log)
//!         ↕                                      ↓
//! [rimo-host]
//!   ├── domain/            HostConfig
//!   ├── application/
//!   │     ├── hub          single event loop owning all session state
//!   │     ├── session_registry, command_channel, capture_loop,
//!   │     └── stats, relay_bridge, task
//!   └── infrastructure/
//!         ├── ws_server    WebSocket accept loop + token handshake
//!         ├── http_api     axum pairing bootstrap
//!         ├── identity     bearer-token → owner id
//!         ├── local_link   the host's own control-surface connection
//!         ├── settings     TOML settings file
//!         └── platform     capability implementations
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` talks to the OS only through the `InputExecutor`,
//!   `ScreenCapture` and `MetricsSampler` traits.
//! - `infrastructure` owns sockets, files and the concrete capabilities.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: session state, dispatch, mirroring, relay draining.
pub mod application;

/// Infrastructure layer: servers, identity, settings, platform capabilities.
pub mod infrastructure;
