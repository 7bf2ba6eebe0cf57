//! Periodic `mobile-to-pc {kind: "status"}` reports.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rimo_core::protocol::commands::MobileReportKind;
use rimo_core::Command;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::SessionSender;

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    /// Percent, 0–100.
    pub level: u8,
    pub charging: bool,
}

/// Reads the controller's own battery.  `None` means there is nothing to
/// report this time.
#[async_trait]
pub trait BatterySource: Send + Sync {
    async fn sample(&self) -> Option<BatteryStatus>;
}

/// Default location of the kernel's power-supply class.
pub const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Reads the first battery under a power-supply directory.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    root: PathBuf,
}

impl SysfsBattery {
    pub fn new() -> Self {
        Self::at(POWER_SUPPLY_DIR)
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_battery(path: &Path) -> Option<BatteryStatus> {
        let kind = fs::read_to_string(path.join("type")).await.ok()?;
        if kind.trim() != "Battery" {
            return None;
        }
        let level = fs::read_to_string(path.join("capacity"))
            .await
            .ok()?
            .trim()
            .parse::<u8>()
            .ok()?;
        let charging = fs::read_to_string(path.join("status"))
            .await
            .is_ok_and(|s| s.trim() == "Charging");
        Some(BatteryStatus {
            level: level.min(100),
            charging,
        })
    }
}

impl Default for SysfsBattery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatterySource for SysfsBattery {
    async fn sample(&self) -> Option<BatteryStatus> {
        let mut dir = fs::read_dir(&self.root).await.ok()?;
        while let Ok(Some(entry)) = dir.next_entry().await {
            if let Some(status) = Self::read_battery(&entry.path()).await {
                return Some(status);
            }
        }
        None
    }
}

pub fn status_command(status: BatteryStatus) -> Command {
    Command::MobileToPc {
        kind: MobileReportKind::Status,
        battery: Some(status.level),
        charging: Some(status.charging),
    }
}

/// Running reporter; stops when dropped.
pub struct StatusReporter {
    handle: JoinHandle<()>,
}

impl StatusReporter {
    /// Sends a status report every `period`, starting immediately.  Ticks
    /// without a sample are skipped; the reporter stops once the session is
    /// gone.
    pub fn spawn(battery: Arc<dyn BatterySource>, period: Duration, sender: SessionSender) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(status) = battery.sample().await else {
                    continue;
                };
                if let Err(e) = sender.send(status_command(status)).await {
                    debug!("status reporter stopped: {e}");
                    break;
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
