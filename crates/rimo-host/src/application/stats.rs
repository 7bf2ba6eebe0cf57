//! Per-connection `system-stats` pushes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use rimo_core::Command;

use crate::application::task::{spawn_periodic, TaskGuard};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("metrics unavailable: {0}")]
pub struct StatsError(pub String);

/// One sample of host load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemSnapshot {
    /// Percent, 0–100.
    pub cpu: u8,
    /// Percent of memory in active use, 0–100.
    pub mem: u8,
    /// Battery percent, `None` when the machine has no battery.
    pub battery: Option<u8>,
    pub is_charging: bool,
}

impl From<SystemSnapshot> for Command {
    fn from(s: SystemSnapshot) -> Self {
        Command::SystemStats {
            cpu: s.cpu.min(100),
            mem: s.mem.min(100),
            battery: s.battery.map(|b| b.min(100)),
            is_charging: s.is_charging,
        }
    }
}

/// Abstraction over CPU/RAM/battery sampling.
#[async_trait]
pub trait MetricsSampler: Send + Sync {
    async fn sample(&self) -> Result<SystemSnapshot, StatsError>;
}

/// Pushes a `system-stats` command to `outbound` every `period`.
///
/// Sampling failures and full queues skip that tick silently.
pub fn spawn_stats_task(
    sampler: Arc<dyn MetricsSampler>,
    period: Duration,
    outbound: mpsc::Sender<Command>,
) -> TaskGuard {
    spawn_periodic(period, move || {
        let sampler = Arc::clone(&sampler);
        let outbound = outbound.clone();
        async move {
            match sampler.sample().await {
                Ok(snapshot) => {
                    let _ = outbound.try_send(snapshot.into());
                }
                Err(e) => debug!("stats sample skipped: {e}"),
            }
        }
    })
}
