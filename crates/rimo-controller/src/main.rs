//! Rimo headless controller entry point.
//!
//! # Usage
//!
//! ```text
//! rimo-controller [OPTIONS]
//!
//! Options:
//!   --server <ADDR>          Host address, e.g. 192.168.1.20:3001
//!   --token <TOKEN>          Token from the pairing QR code or network-info
//!   --owner <ID>             Owner identity; enables the relay fallback
//!   --relay-url <URL>        Relay service, e.g. ws://relay.example:3100
//!   --relay-key <KEY>        Relay service access key
//!   --code <CODE>            Pairing code shown by the host
//!   --sensitivity <X>        Pointer sensitivity [default: 1.0]
//!   --scroll-sensitivity <X> Two-finger scroll multiplier [default: 1.0]
//!   --cache <PATH>           Remembered credentials [default: rimo-controller.toml]
//! ```
//!
//! Commands are read from stdin one per line (see the `input` module);
//! commands pushed back by the host are printed to stdout as JSON lines.
//! On the relay path the host's mirrored frames are printed the same way.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rimo_core::gesture::GestureSettings;
use rimo_core::{encode_command, OwnerId};
use rimo_link::{RelaySender, RemoteRelayStore, TransportRouter, WsConnector};

use rimo_controller::cache::CredentialCache;
use rimo_controller::frames::{FrameWatcher, DEFAULT_FRAME_POLL};
use rimo_controller::input::InputTranslator;
use rimo_controller::session::{
    apply_connection_record, connect, ConnectOptions, ConnectOutcome, RecordOutcome, SessionSender,
};
use rimo_controller::status::{StatusReporter, SysfsBattery, DEFAULT_STATUS_INTERVAL};

/// Headless Rimo controller.
#[derive(Debug, Parser)]
#[command(name = "rimo-controller", version)]
struct Cli {
    /// Host address.  Beats the remembered one.
    #[arg(long, env = "RIMO_SERVER")]
    server: Option<String>,

    /// Connection token.  Replaces the remembered one.
    #[arg(long, env = "RIMO_TOKEN")]
    token: Option<String>,

    /// Owner identity used for the relay fallback.
    #[arg(long, env = "RIMO_OWNER")]
    owner: Option<String>,

    /// Relay service address.  The relay path needs this and `--owner`.
    #[arg(long, env = "RIMO_RELAY_URL")]
    relay_url: Option<String>,

    #[arg(long, env = "RIMO_RELAY_KEY", default_value = "")]
    relay_key: String,

    /// Pairing code; with `--owner` and a relay, adopts the host's token.
    #[arg(long, env = "RIMO_PAIRING_CODE")]
    code: Option<String>,

    #[arg(long, default_value_t = 1.0)]
    sensitivity: f64,

    #[arg(long, default_value_t = 1.0)]
    scroll_sensitivity: f64,

    #[arg(long, default_value = "rimo-controller.toml", env = "RIMO_CONTROLLER_CACHE")]
    cache: PathBuf,
}

impl Cli {
    fn owner(&self) -> Option<OwnerId> {
        self.owner
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(OwnerId::new)
    }

    /// Relay handle, when both an owner and a relay service are given.
    fn relay(&self) -> Option<RelaySender> {
        let owner = self.owner()?;
        let url = self
            .relay_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())?;
        let store = RemoteRelayStore::new(url, self.relay_key.clone());
        Some(RelaySender::new(Arc::new(store), owner))
    }

    fn gesture_settings(&self) -> GestureSettings {
        GestureSettings {
            sensitivity: self.sensitivity,
            scroll_sensitivity: self.scroll_sensitivity,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cache = CredentialCache::load(&cli.cache)
        .with_context(|| format!("cannot load {}", cli.cache.display()))?;
    if let Some(token) = &cli.token {
        cache.set_token(token.clone());
    }

    let relay = cli.relay();
    if let Some(relay) = &relay {
        match apply_connection_record(&mut cache, relay, cli.code.as_deref()).await {
            Ok(RecordOutcome::CodeMismatch) => warn!("pairing code does not match the host's"),
            Ok(outcome) => info!("connection record: {outcome:?}"),
            Err(e) => warn!("cannot read the host's connection record: {e}"),
        }
    }
    let options = ConnectOptions {
        server: cli.server.clone(),
        owner: cli.owner(),
    };

    let router = TransportRouter::new(WsConnector::new());
    let outcome = connect(&router, &mut cache, &options, relay).await;
    cache.save().context("cannot save credential cache")?;

    let session = match outcome {
        ConnectOutcome::Connected(session) => session,
        ConnectOutcome::PairingRequired => {
            error!("not paired: scan the host's QR code or pass --token");
            return Ok(());
        }
        ConnectOutcome::Unreachable(e) => {
            error!("host unreachable, try again: {e}");
            return Ok(());
        }
    };

    // ── Host → stdout ─────────────────────────────────────────────────────────
    if let Some(mut link) = session.link {
        tokio::spawn(async move {
            while let Some(cmd) = link.recv().await {
                match encode_command(&cmd) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("cannot print {}: {e}", cmd.type_name()),
                }
            }
            info!("host closed the direct channel");
        });
    }

    let _frames = match &session.sender {
        SessionSender::Relay(relay) => {
            let (tx, mut rx) = mpsc::channel(8);
            tokio::spawn(async move {
                while let Some(cmd) = rx.recv().await {
                    match encode_command(&cmd) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!("cannot print {}: {e}", cmd.type_name()),
                    }
                }
            });
            Some(FrameWatcher::spawn(relay.clone(), DEFAULT_FRAME_POLL, tx))
        }
        SessionSender::Direct(_) => None,
    };

    let _status = StatusReporter::spawn(
        Arc::new(SysfsBattery::new()),
        DEFAULT_STATUS_INTERVAL,
        session.sender.clone(),
    );

    // ── stdin → host ──────────────────────────────────────────────────────────
    let mut translator = InputTranslator::new(cli.gesture_settings());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("cannot read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C; exiting");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let commands = match translator.translate(&line) {
            Ok(commands) => commands,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        for cmd in commands {
            if let Err(e) = session.sender.send(cmd).await {
                error!("session ended: {e}");
                return Ok(());
            }
        }
    }

    Ok(())
}
