//! Optional TOML settings file for the host.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! [`HostConfig::default()`].  CLI flags are layered on top afterwards.
//!
//! ```toml
//! [network]
//! bind_address = "0.0.0.0"
//! http_port = 3000
//! ws_port = 3001
//! advertised_ips = ["192.168.1.20"]
//! trust_loopback = true
//!
//! [session]
//! token_ttl_secs = 3600
//! pairing_ttl_secs = 900
//! mirror_interval_ms = 80
//! stats_interval_secs = 3
//! scroll_sensitivity = 1.0
//! local_link = true
//!
//! [relay]
//! owner = "ana@example.com"
//! url = "ws://relay.example:3100"
//! access_key = "s3cret"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rimo_core::OwnerId;

use crate::domain::HostConfig;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error reading settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostSettings {
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default)]
    pub advertised_ips: Vec<IpAddr>,
    #[serde(default = "default_true")]
    pub trust_loopback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_pairing_ttl_secs")]
    pub pairing_ttl_secs: u64,
    #[serde(default = "default_mirror_interval_ms")]
    pub mirror_interval_ms: u64,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    #[serde(default = "default_scroll_sensitivity")]
    pub scroll_sensitivity: f64,
    #[serde(default = "default_true")]
    pub local_link: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelaySettings {
    /// Owner id whose relay log this host drains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Relay service address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub access_key: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_http_port() -> u16 {
    3000
}
fn default_ws_port() -> u16 {
    3001
}
fn default_true() -> bool {
    true
}
fn default_token_ttl_secs() -> u64 {
    60 * 60
}
fn default_pairing_ttl_secs() -> u64 {
    15 * 60
}
fn default_mirror_interval_ms() -> u64 {
    80
}
fn default_stats_interval_secs() -> u64 {
    3
}
fn default_scroll_sensitivity() -> f64 {
    1.0
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            advertised_ips: Vec::new(),
            trust_loopback: default_true(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
            pairing_ttl_secs: default_pairing_ttl_secs(),
            mirror_interval_ms: default_mirror_interval_ms(),
            stats_interval_secs: default_stats_interval_secs(),
            scroll_sensitivity: default_scroll_sensitivity(),
            local_link: default_true(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses settings from TOML text.
///
/// # Errors
///
/// Returns [`SettingsError::Parse`] for invalid TOML or wrongly typed values.
pub fn parse_settings(text: &str) -> Result<HostSettings, SettingsError> {
    Ok(toml::from_str(text)?)
}

/// Reads and parses the settings file at `path`.
///
/// # Errors
///
/// Returns [`SettingsError::Io`] if the file cannot be read, or
/// [`SettingsError::Parse`] if its content is invalid.
pub fn load_settings(path: &Path) -> Result<HostSettings, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_settings(&text)
}

impl HostSettings {
    pub fn into_config(self) -> HostConfig {
        let net = self.network;
        let session = self.session;
        let relay = self.relay;
        HostConfig {
            http_bind_addr: SocketAddr::new(net.bind_address, net.http_port),
            ws_bind_addr: SocketAddr::new(net.bind_address, net.ws_port),
            token_ttl: Duration::from_secs(session.token_ttl_secs),
            pairing_ttl: Duration::from_secs(session.pairing_ttl_secs),
            mirror_interval: Duration::from_millis(session.mirror_interval_ms.max(1)),
            stats_interval: Duration::from_secs(session.stats_interval_secs.max(1)),
            scroll_sensitivity: session.scroll_sensitivity,
            advertised_ips: net.advertised_ips,
            relay_owner: relay
                .owner
                .filter(|o| !o.trim().is_empty())
                .map(OwnerId::new),
            relay_url: relay.url.filter(|u| !u.trim().is_empty()),
            relay_key: relay.access_key,
            local_link: session.local_link,
            trust_loopback: net.trust_loopback,
        }
    }
}
