//! Rimo relay service entry point.
//!
//! # Usage
//!
//! ```text
//! rimo-relay [OPTIONS]
//!
//! Options:
//!   --bind <IP>            Listener address [default: 0.0.0.0]
//!   --port <PORT>          Listener port [default: 3100]
//!   --access-key <KEY>     Token clients must present
//! ```
//!
//! Options also read `RIMO_RELAY_BIND`, `RIMO_RELAY_PORT` and
//! `RIMO_RELAY_KEY`.

use std::net::IpAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rimo_link::MemoryRelayStore;
use rimo_relay::config::RelayConfig;
use rimo_relay::server::{run_server, RelayContext};

/// Rimo relay: meeting point for controllers and hosts on different networks.
#[derive(Debug, Parser)]
#[command(name = "rimo-relay", version)]
struct Cli {
    #[arg(long, env = "RIMO_RELAY_BIND")]
    bind: Option<IpAddr>,

    #[arg(long, env = "RIMO_RELAY_PORT")]
    port: Option<u16>,

    /// Handshake token clients must present.  Unset means open access.
    #[arg(long, env = "RIMO_RELAY_KEY")]
    access_key: Option<String>,
}

impl Cli {
    fn into_relay_config(self) -> RelayConfig {
        let mut cfg = RelayConfig::default();
        if let Some(ip) = self.bind {
            cfg.bind_addr.set_ip(ip);
        }
        if let Some(port) = self.port {
            cfg.bind_addr.set_port(port);
        }
        cfg.access_key = self.access_key.filter(|k| !k.is_empty());
        cfg
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_relay_config();
    if config.access_key.is_none() {
        warn!("no access key configured; any client may read and write every owner's log");
    }

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

    let ctx = RelayContext {
        store: Arc::new(MemoryRelayStore::new()),
        access_key: config.access_key,
    };
    run_server(config.bind_addr, ctx, running).await?;

    info!("rimo relay stopped");
    Ok(())
}
