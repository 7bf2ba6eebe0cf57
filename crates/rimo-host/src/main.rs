//! Rimo host service entry point.
//!
//! # Usage
//!
//! ```text
//! rimo-host [OPTIONS]
//!
//! Options:
//!   --config <PATH>              TOML settings file
//!   --bind <IP>                  Address for both listeners [default: 0.0.0.0]
//!   --http-port <PORT>           Pairing API port [default: 3000]
//!   --ws-port <PORT>             Real-time channel port [default: 3001]
//!   --relay-owner <ID>           Owner whose relay log this host drains
//!   --relay-url <URL>            Relay service; unset disables the relay path
//!   --relay-key <KEY>            Relay service access key
//!   --advertise <IP>             Address reported by network-info (repeatable)
//!   --mirror-interval-ms <MS>    Period between mirrored frames
//!   --no-local-link              Do not open the local control-surface link
//! ```
//!
//! Every option also reads an environment variable (`RIMO_CONFIG`,
//! `RIMO_BIND`, `RIMO_HTTP_PORT`, `RIMO_WS_PORT`, `RIMO_RELAY_OWNER`,
//! `RIMO_RELAY_URL`, `RIMO_RELAY_KEY`).  CLI values take precedence over the
//! settings file.
//!
//! # What runs
//!
//! ```text
//! main()
//!  ├─ Hub::run              single task owning all session state
//!  ├─ run_http              axum pairing bootstrap
//!  ├─ run_local_link        the host's own loopback connection
//!  └─ run_server            WebSocket accept loop (until Ctrl+C)
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rimo_core::{CredentialStore, OwnerId, SystemClock};
use rimo_link::{RelayStore, RemoteRelayStore};

use rimo_host::application::{CommandChannel, Hub, HubServices, HubSettings, RelayBridge};
use rimo_host::domain::HostConfig;
use rimo_host::infrastructure::http_api::{run_http, HttpState};
use rimo_host::infrastructure::identity::UnverifiedJwtIdentity;
use rimo_host::infrastructure::local_link::run_local_link;
use rimo_host::infrastructure::platform;
use rimo_host::infrastructure::settings::{load_settings, HostSettings};
use rimo_host::infrastructure::ws_server::{run_server, ServerContext};

/// Depth of the hub's event queue.
const HUB_QUEUE: usize = 1024;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Rimo host: lets paired phones drive this machine.
#[derive(Debug, Parser)]
#[command(name = "rimo-host", version)]
struct Cli {
    /// TOML settings file.  Missing fields take their defaults.
    #[arg(long, env = "RIMO_CONFIG")]
    config: Option<PathBuf>,

    /// IP address both listeners bind to.
    #[arg(long, env = "RIMO_BIND")]
    bind: Option<IpAddr>,

    #[arg(long, env = "RIMO_HTTP_PORT")]
    http_port: Option<u16>,

    #[arg(long, env = "RIMO_WS_PORT")]
    ws_port: Option<u16>,

    /// Owner id whose relay log this host drains.
    #[arg(long, env = "RIMO_RELAY_OWNER")]
    relay_owner: Option<String>,

    /// Relay service address, e.g. `ws://relay.example:3100`.
    #[arg(long, env = "RIMO_RELAY_URL")]
    relay_url: Option<String>,

    #[arg(long, env = "RIMO_RELAY_KEY")]
    relay_key: Option<String>,

    /// Address reported to controllers by `network-info`.  Repeatable.
    #[arg(long = "advertise")]
    advertised_ips: Vec<IpAddr>,

    #[arg(long)]
    mirror_interval_ms: Option<u64>,

    /// Skip the host's own loopback control-surface link.
    #[arg(long)]
    no_local_link: bool,
}

impl Cli {
    /// Layers the CLI flags over the settings file (or the defaults).
    ///
    /// # Errors
    ///
    /// Returns an error if `--config` names a file that cannot be read or
    /// parsed.
    fn into_host_config(self) -> anyhow::Result<HostConfig> {
        let settings = match &self.config {
            Some(path) => load_settings(path)
                .with_context(|| format!("cannot load settings from {}", path.display()))?,
            None => HostSettings::default(),
        };
        let mut cfg = settings.into_config();

        if let Some(ip) = self.bind {
            cfg.http_bind_addr.set_ip(ip);
            cfg.ws_bind_addr.set_ip(ip);
        }
        if let Some(port) = self.http_port {
            cfg.http_bind_addr.set_port(port);
        }
        if let Some(port) = self.ws_port {
            cfg.ws_bind_addr.set_port(port);
        }
        if let Some(owner) = self.relay_owner.filter(|o| !o.trim().is_empty()) {
            cfg.relay_owner = Some(OwnerId::new(owner));
        }
        if let Some(url) = self.relay_url.filter(|u| !u.trim().is_empty()) {
            cfg.relay_url = Some(url);
        }
        if let Some(key) = self.relay_key {
            cfg.relay_key = key;
        }
        if !self.advertised_ips.is_empty() {
            cfg.advertised_ips = self.advertised_ips;
        }
        if let Some(ms) = self.mirror_interval_ms {
            cfg.mirror_interval = Duration::from_millis(ms.max(1));
        }
        if self.no_local_link {
            cfg.local_link = false;
        }
        Ok(cfg)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_host_config()?;
    info!(
        "rimo host starting: http={}, ws={}, relay={}, relay owner={}",
        config.http_bind_addr,
        config.ws_bind_addr,
        config.relay_url.as_deref().unwrap_or("none"),
        config
            .relay_owner
            .as_ref()
            .map_or("none", |o| o.as_str())
    );

    let credentials = Arc::new(Mutex::new(CredentialStore::with_ttls(
        Arc::new(SystemClock),
        config.token_ttl,
        config.pairing_ttl,
    )));

    // ── Hub ───────────────────────────────────────────────────────────────────
    let caps = platform::detect();
    let channel = Arc::new(CommandChannel::new(caps.input, config.scroll_sensitivity));
    let relay_store: Option<Arc<dyn RelayStore>> = config.relay_url.as_ref().map(|url| {
        Arc::new(RemoteRelayStore::new(url.clone(), config.relay_key.clone())) as Arc<dyn RelayStore>
    });
    let relay = relay_store.as_ref().map(|store| {
        RelayBridge::new(
            Arc::clone(store),
            Arc::clone(&channel),
            Arc::clone(&caps.capture),
            config.mirror_interval,
        )
    });
    let hub = Hub::new(
        HubServices {
            channel,
            capture: caps.capture,
            sampler: caps.sampler,
            relay,
        },
        HubSettings::from(&config),
    );
    let (hub_tx, hub_rx) = mpsc::channel(HUB_QUEUE);
    tokio::spawn(hub.run(hub_rx));

    // ── Shutdown flag ─────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── HTTP pairing bootstrap ────────────────────────────────────────────────
    let http_state = HttpState {
        credentials: Arc::clone(&credentials),
        identity: Arc::new(UnverifiedJwtIdentity),
        ws_port: config.ws_bind_addr.port(),
        advertised_ips: config.advertised_ips.clone(),
        relay: relay_store,
    };
    let http_running = Arc::clone(&running);
    let http_addr = config.http_bind_addr;
    tokio::spawn(async move {
        let shutdown = async move {
            while http_running.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        };
        if let Err(e) = run_http(http_addr, http_state, shutdown).await {
            error!("pairing API stopped: {e:#}");
        }
    });

    // ── Local control surface ─────────────────────────────────────────────────
    if config.local_link {
        let credentials = Arc::clone(&credentials);
        let ws_port = config.ws_bind_addr.port();
        let owner = config.relay_owner.clone();
        tokio::spawn(async move {
            if let Err(e) = run_local_link(credentials, ws_port, owner).await {
                warn!("local control surface: {e:#}");
            }
        });
    }

    // ── Real-time channel ─────────────────────────────────────────────────────
    let ctx = ServerContext {
        credentials,
        hub: hub_tx,
        trust_loopback: config.trust_loopback,
    };
    run_server(config.ws_bind_addr, ctx, running).await?;

    info!("rimo host stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
