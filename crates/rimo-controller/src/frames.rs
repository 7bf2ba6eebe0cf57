//! Mirrored frames over the relay.
//!
//! On the relay path the host overwrites one latest-frame slot instead of
//! pushing frames down a socket.  [`FrameWatcher`] polls that slot and
//! emits a `screenshot-data` command whenever its content changes, so the
//! rest of the controller handles both paths the same way.

use std::time::Duration;

use rimo_core::Command;
use rimo_link::RelaySender;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Polling period; a little faster than the host's default mirror rate.
pub const DEFAULT_FRAME_POLL: Duration = Duration::from_millis(60);

/// Running watcher; stops when dropped.
pub struct FrameWatcher {
    handle: JoinHandle<()>,
}

impl FrameWatcher {
    /// Polls `relay` every `period` and sends each new frame to `out`.
    /// Read errors are skipped; the watcher stops once `out` is closed.
    pub fn spawn(relay: RelaySender, period: Duration, out: mpsc::Sender<Command>) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last: Option<String> = None;
            loop {
                tokio::select! {
                    _ = out.closed() => break,
                    _ = ticker.tick() => {}
                }
                let blob = match relay.latest_frame().await {
                    Ok(Some(blob)) => blob,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(owner = %relay.owner(), "frame read failed: {e}");
                        continue;
                    }
                };
                if last.as_deref() == Some(blob.as_str()) {
                    continue;
                }
                last = Some(blob.clone());
                if out.send(Command::ScreenshotData { blob }).await.is_err() {
                    break;
                }
            }
            debug!(owner = %relay.owner(), "frame watcher stopped");
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for FrameWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
