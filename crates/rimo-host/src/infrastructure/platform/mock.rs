//! Recording capability doubles for tests.
//!
//! # Why mocks?
//!
//! The real capabilities move the pointer, grab the screen, or read
//! `/proc`.  None of that is observable from a test, and a CI runner has no
//! desktop.  The doubles here record every call in a `Mutex<Vec<..>>` so a
//! test can assert exactly what happened and in what order.
//!
//! # `should_fail`
//!
//! Each double has a failing constructor whose calls all return a platform
//! error, for exercising the "log and continue" paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use rimo_core::protocol::commands::{DisplayInfo, MouseButton, SystemAction};

use crate::application::capture_loop::{CaptureError, FrameSink, ScreenCapture};
use crate::application::command_channel::{ExecutionError, InputExecutor};
use crate::application::stats::{MetricsSampler, StatsError, SystemSnapshot};

/// Smallest byte sequence with JPEG start and end markers.
pub const MOCK_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

// ── Input ─────────────────────────────────────────────────────────────────────

/// One recorded [`InputExecutor`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum InputCall {
    Move(f64, f64),
    Drag(f64, f64),
    Click(MouseButton, bool),
    Toggle(MouseButton, bool),
    Scroll(f64),
    KeyTap(String, Vec<String>),
    Type(String),
    System(SystemAction),
    OpenPath(String),
}

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct MockInputExecutor {
    calls: Mutex<Vec<InputCall>>,
    /// When `true`, every call returns `ExecutionError::Platform`.
    pub should_fail: bool,
    /// Runs at the start of every call.
    hook: Option<Hook>,
}

impl MockInputExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Runs `hook` inside every call, before it is recorded.
    pub fn with_hook(hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            hook: Some(Box::new(hook)),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<InputCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: InputCall) -> Result<(), ExecutionError> {
        if let Some(hook) = &self.hook {
            hook();
        }
        if self.should_fail {
            return Err(ExecutionError::Platform("mock failure".into()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl InputExecutor for MockInputExecutor {
    async fn move_pointer_by(&self, dx: f64, dy: f64) -> Result<(), ExecutionError> {
        self.record(InputCall::Move(dx, dy))
    }

    async fn drag_pointer_by(&self, dx: f64, dy: f64) -> Result<(), ExecutionError> {
        self.record(InputCall::Drag(dx, dy))
    }

    async fn click(&self, button: MouseButton, double: bool) -> Result<(), ExecutionError> {
        self.record(InputCall::Click(button, double))
    }

    async fn toggle_button(&self, button: MouseButton, down: bool) -> Result<(), ExecutionError> {
        self.record(InputCall::Toggle(button, down))
    }

    async fn scroll(&self, dy: f64) -> Result<(), ExecutionError> {
        self.record(InputCall::Scroll(dy))
    }

    async fn key_tap(&self, key: &str, modifiers: &[String]) -> Result<(), ExecutionError> {
        self.record(InputCall::KeyTap(key.to_string(), modifiers.to_vec()))
    }

    async fn type_text(&self, text: &str) -> Result<(), ExecutionError> {
        self.record(InputCall::Type(text.to_string()))
    }

    async fn system_control(&self, action: SystemAction) -> Result<(), ExecutionError> {
        self.record(InputCall::System(action))
    }

    async fn open_path(&self, path: &str) -> Result<(), ExecutionError> {
        self.record(InputCall::OpenPath(path.to_string()))
    }
}

// ── Screen capture ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockScreenCapture {
    latency: Duration,
    pub should_fail: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requested: Mutex<Vec<u32>>,
}

impl MockScreenCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capture takes `latency` (on the tokio clock).
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Highest number of captures that were ever running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Display ids passed to `capture`, in call order.
    pub fn requested_displays(&self) -> Vec<u32> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScreenCapture for MockScreenCapture {
    async fn capture(&self, display_id: u32) -> Result<Vec<u8>, CaptureError> {
        self.requested.lock().unwrap().push(display_id);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail {
            Err(CaptureError::Platform("mock failure".into()))
        } else {
            Ok(MOCK_JPEG.to_vec())
        }
    }

    async fn list_displays(&self) -> Result<Vec<DisplayInfo>, CaptureError> {
        if self.should_fail {
            return Err(CaptureError::Platform("mock failure".into()));
        }
        Ok(vec![DisplayInfo {
            id: 0,
            name: "Mock Display".into(),
        }])
    }
}

/// Collects every delivered frame.
#[derive(Default)]
pub struct RecordingFrameSink {
    frames: Mutex<Vec<String>>,
}

impl RecordingFrameSink {
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameSink for RecordingFrameSink {
    async fn deliver(&self, blob: String) {
        self.frames.lock().unwrap().push(blob);
    }
}

// ── Metrics ───────────────────────────────────────────────────────────────────

pub struct MockMetricsSampler {
    /// `None` makes every sample fail.
    snapshot: Option<SystemSnapshot>,
    calls: AtomicUsize,
}

impl MockMetricsSampler {
    pub fn new(snapshot: SystemSnapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            snapshot: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSampler for MockMetricsSampler {
    async fn sample(&self) -> Result<SystemSnapshot, StatsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.snapshot
            .ok_or_else(|| StatsError("mock failure".into()))
    }
}
