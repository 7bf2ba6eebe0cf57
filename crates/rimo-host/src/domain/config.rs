//! Host configuration types.
//!
//! [`HostConfig`] is the single source of truth for all runtime settings.
//! It is built once at startup from CLI flags layered over the optional
//! settings file, and then shared read-only.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rimo_core::credentials::{DEFAULT_PAIRING_TTL, DEFAULT_TOKEN_TTL};
use rimo_core::OwnerId;

/// All runtime configuration for the host service.
///
/// # Example
///
/// ```rust
/// use rimo_host::domain::HostConfig;
///
/// let cfg = HostConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 3001);
/// assert_eq!(cfg.http_bind_addr.port(), 3000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Address of the HTTP pairing bootstrap (`/api/network-info`,
    /// `/api/pairing-code`).
    pub http_bind_addr: SocketAddr,

    /// Address of the direct real-time WebSocket channel.
    pub ws_bind_addr: SocketAddr,

    /// Lifetime of connection tokens.
    pub token_ttl: Duration,

    /// Lifetime of pairing codes.
    pub pairing_ttl: Duration,

    /// Period between screen captures while mirroring.
    pub mirror_interval: Duration,

    /// Period between `system-stats` pushes to each connection.
    pub stats_interval: Duration,

    /// Secondary multiplier applied to `mouse-scroll` deltas.
    pub scroll_sensitivity: f64,

    /// Addresses reported by `network-info`.  Empty means discover the
    /// outbound-route address.
    pub advertised_ips: Vec<IpAddr>,

    /// Owner whose relay log this host drains.  `None` disables the relay
    /// path unless a host connection declares an owner in `set-role`.
    pub relay_owner: Option<OwnerId>,

    /// Relay service address (`ws://…`).  `None` disables the relay path.
    pub relay_url: Option<String>,

    /// Handshake token for the relay service.
    pub relay_key: String,

    /// Open the host's own loopback control-surface link at startup.
    pub local_link: bool,

    /// Accept handshakes from loopback peers without a valid token.
    pub trust_loopback: bool,
}

impl Default for HostConfig {
    /// | Field              | Default          |
    /// |--------------------|------------------|
    /// | http_bind_addr     | `0.0.0.0:3000`   |
    /// | ws_bind_addr       | `0.0.0.0:3001`   |
    /// | token_ttl          | 1 hour           |
    /// | pairing_ttl        | 15 minutes       |
    /// | mirror_interval    | 80 ms            |
    /// | stats_interval     | 3 seconds        |
    /// | scroll_sensitivity | 1.0              |
    fn default() -> Self {
        Self {
            // Compile-time-known valid socket address strings.
            http_bind_addr: "0.0.0.0:3000".parse().unwrap(),
            ws_bind_addr: "0.0.0.0:3001".parse().unwrap(),
            token_ttl: DEFAULT_TOKEN_TTL,
            pairing_ttl: DEFAULT_PAIRING_TTL,
            mirror_interval: Duration::from_millis(80),
            stats_interval: Duration::from_secs(3),
            scroll_sensitivity: 1.0,
            advertised_ips: Vec::new(),
            relay_owner: None,
            relay_url: None,
            relay_key: String::new(),
            local_link: true,
            trust_loopback: true,
        }
    }
}
