//! Periodic screen capture for mirroring.
//!
//! # One mirror session per requester
//!
//! [`CaptureLoop`] keeps at most one [`MirrorSession`] per key (the
//! requesting connection).  Starting again replaces the old session, so a
//! requester never has two timers.  Stopping is idempotent.
//!
//! # Single flight
//!
//! Each session runs one task that `select!`s between its ticker and the
//! capture currently in flight:
//!
//! ```text
//! tick ──► nothing in flight? ──yes──► start capture
//!                 │
//!                 no ──► skip this tick (never queued)
//!
//! capture done ──► Ok(jpeg)  ──► sink.deliver(data URL)
//!              └─► Err(_)    ──► log, wait for next tick
//! ```
//!
//! Because a capture is only started from a tick that saw no capture in
//! flight, two captures for the same session never overlap, however slow
//! the capability is relative to the interval.  Frames reach the sink in
//! capture-completion order.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use rimo_core::protocol::commands::DisplayInfo;
use rimo_core::protocol::frame::jpeg_data_url;
use rimo_core::{Command, ConnectionId};

use crate::application::task::TaskGuard;

/// Errors from the screen-capture capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("screen capture unavailable")]
    Unavailable,
    #[error("display {0} not found")]
    NoSuchDisplay(u32),
    #[error("capture failed: {0}")]
    Platform(String),
}

/// Abstraction over grabbing the host screen.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Captures one JPEG frame of `display_id`.
    async fn capture(&self, display_id: u32) -> Result<Vec<u8>, CaptureError>;

    async fn list_displays(&self) -> Result<Vec<DisplayInfo>, CaptureError>;
}

/// Where a mirror session's frames go.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Delivers one `data:image/jpeg;base64,...` blob.  Best effort.
    async fn deliver(&self, blob: String);
}

/// Sends frames to one connection as `screenshot-data`.
///
/// Uses `try_send`: when the peer's queue is full the frame is dropped.
pub struct ConnectionFrameSink {
    outbound: mpsc::Sender<Command>,
}

impl ConnectionFrameSink {
    pub fn new(outbound: mpsc::Sender<Command>) -> Self {
        Self { outbound }
    }
}

#[async_trait]
impl FrameSink for ConnectionFrameSink {
    async fn deliver(&self, blob: String) {
        match self.outbound.try_send(Command::ScreenshotData { blob }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("peer queue full; frame dropped"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Counters shared with a running session.
#[derive(Debug, Default)]
pub struct MirrorStats {
    pub captures_started: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub ticks_skipped: AtomicU64,
}

/// One active mirroring request.
pub struct MirrorSession {
    pub display_id: u32,
    pub interval: Duration,
    stats: Arc<MirrorStats>,
    _task: TaskGuard,
}

impl MirrorSession {
    pub fn stats(&self) -> &MirrorStats {
        &self.stats
    }
}

/// All mirror sessions, keyed by requester.
pub struct CaptureLoop {
    capture: Arc<dyn ScreenCapture>,
    sessions: HashMap<ConnectionId, MirrorSession>,
}

impl CaptureLoop {
    pub fn new(capture: Arc<dyn ScreenCapture>) -> Self {
        Self {
            capture,
            sessions: HashMap::new(),
        }
    }

    /// Starts (or restarts) mirroring `display_id` for `requester`.
    pub fn start(
        &mut self,
        requester: ConnectionId,
        display_id: u32,
        interval: Duration,
        sink: Arc<dyn FrameSink>,
    ) -> Arc<MirrorStats> {
        let stats = Arc::new(MirrorStats::default());
        let task = TaskGuard::spawn(run_mirror(
            Arc::clone(&self.capture),
            display_id,
            interval,
            sink,
            Arc::clone(&stats),
        ));
        let replaced = self.sessions.insert(
            requester,
            MirrorSession {
                display_id,
                interval,
                stats: Arc::clone(&stats),
                _task: task,
            },
        );
        if replaced.is_some() {
            debug!(%requester, "mirroring restarted");
        } else {
            info!(%requester, display_id, ?interval, "mirroring started");
        }
        stats
    }

    /// Stops mirroring for `requester`.  Returns whether a session existed.
    pub fn stop(&mut self, requester: ConnectionId) -> bool {
        let stopped = self.sessions.remove(&requester).is_some();
        if stopped {
            info!(%requester, "mirroring stopped");
        }
        stopped
    }

    pub fn is_running(&self, requester: ConnectionId) -> bool {
        self.sessions.contains_key(&requester)
    }

    pub fn session(&self, requester: ConnectionId) -> Option<&MirrorSession> {
        self.sessions.get(&requester)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

type CaptureFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, CaptureError>> + Send>>;

async fn run_mirror(
    capture: Arc<dyn ScreenCapture>,
    display_id: u32,
    interval: Duration,
    sink: Arc<dyn FrameSink>,
    stats: Arc<MirrorStats>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<CaptureFuture> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if in_flight.is_some() {
                    stats.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let capture = Arc::clone(&capture);
                stats.captures_started.fetch_add(1, Ordering::Relaxed);
                in_flight = Some(Box::pin(async move { capture.capture(display_id).await }));
            }
            result = poll_in_flight(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                match result {
                    Ok(jpeg) => {
                        sink.deliver(jpeg_data_url(&jpeg)).await;
                        stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => debug!("capture of display {display_id} failed: {e}"),
                }
            }
        }
    }
}

async fn poll_in_flight(slot: &mut Option<CaptureFuture>) -> Result<Vec<u8>, CaptureError> {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::platform::mock::{MockScreenCapture, RecordingFrameSink};
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn test_slow_capture_never_overlaps() {
        // Arrange: capture takes 200 ms, ticks every 80 ms.
        let capture = Arc::new(MockScreenCapture::with_latency(Duration::from_millis(200)));
        let sink = Arc::new(RecordingFrameSink::default());
        let mut loop_ = CaptureLoop::new(capture.clone());
        let id = Uuid::new_v4();

        // Act
        let stats = loop_.start(id, 0, Duration::from_millis(80), sink.clone());
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        // Assert
        assert_eq!(capture.max_concurrent(), 1);
        assert!(stats.ticks_skipped.load(Ordering::Relaxed) > 0);
        let started = stats.captures_started.load(Ordering::Relaxed);
        assert!((4..=6).contains(&started), "started {started} captures");
        assert!(sink.frames().iter().all(|f| f.starts_with("data:image/jpeg;base64,")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_capture_delivers_every_tick() {
        let capture = Arc::new(MockScreenCapture::new());
        let sink = Arc::new(RecordingFrameSink::default());
        let mut loop_ = CaptureLoop::new(capture.clone());

        loop_.start(Uuid::new_v4(), 0, Duration::from_millis(100), sink.clone());
        tokio::time::sleep(Duration::from_millis(450)).await;

        // Ticks at 0, 100, 200, 300, 400.
        assert_eq!(sink.frames().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_timer() {
        let capture = Arc::new(MockScreenCapture::new());
        let sink = Arc::new(RecordingFrameSink::default());
        let mut loop_ = CaptureLoop::new(capture.clone());
        let id = Uuid::new_v4();

        loop_.start(id, 0, Duration::from_millis(100), sink.clone());
        loop_.start(id, 1, Duration::from_millis(100), sink.clone());
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(loop_.active_count(), 1);
        assert_eq!(loop_.session(id).map(|s| s.display_id), Some(1));
        // Only the second timer is producing frames.
        assert!(capture.requested_displays().iter().skip(1).all(|d| *d == 1));
        assert_eq!(sink.frames().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_and_is_idempotent() {
        let capture = Arc::new(MockScreenCapture::new());
        let sink = Arc::new(RecordingFrameSink::default());
        let mut loop_ = CaptureLoop::new(capture.clone());
        let id = Uuid::new_v4();

        loop_.start(id, 0, Duration::from_millis(100), sink.clone());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(loop_.stop(id));
        let delivered = sink.frames().len();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(sink.frames().len(), delivered);
        assert!(!loop_.stop(id));
        assert!(!loop_.is_running(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_capture_emits_nothing_and_next_tick_retries() {
        let capture = Arc::new(MockScreenCapture::failing());
        let sink = Arc::new(RecordingFrameSink::default());
        let mut loop_ = CaptureLoop::new(capture.clone());

        let stats = loop_.start(Uuid::new_v4(), 0, Duration::from_millis(100), sink.clone());
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert!(sink.frames().is_empty());
        assert_eq!(stats.captures_started.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_connection_sink_wraps_frame_as_screenshot_data() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ConnectionFrameSink::new(tx);

        sink.deliver("data:image/jpeg;base64,AA==".into()).await;
        sink.deliver("dropped".into()).await;

        assert_eq!(
            rx.recv().await,
            Some(Command::ScreenshotData {
                blob: "data:image/jpeg;base64,AA==".into()
            })
        );
        assert!(rx.try_recv().is_err());
    }
}
