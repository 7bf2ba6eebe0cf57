//! Concrete input, capture and metrics capabilities.
//!
//! [`detect`] picks the implementation for the running OS.  On platforms
//! without one, the `Unavailable*` fallbacks let the host keep serving:
//! commands fail with `Unavailable` (logged by the hub and otherwise
//! ignored), screenshots are never produced, and stats pushes are skipped.

use std::sync::Arc;

use async_trait::async_trait;

use rimo_core::protocol::commands::{DisplayInfo, MouseButton, SystemAction};

use crate::application::capture_loop::{CaptureError, ScreenCapture};
use crate::application::command_channel::{ExecutionError, InputExecutor};
use crate::application::stats::{MetricsSampler, StatsError, SystemSnapshot};

#[cfg(target_os = "linux")]
pub mod linux;
pub mod mock;

/// The three capabilities the application layer needs.
#[derive(Clone)]
pub struct Capabilities {
    pub input: Arc<dyn InputExecutor>,
    pub capture: Arc<dyn ScreenCapture>,
    pub sampler: Arc<dyn MetricsSampler>,
}

/// Capabilities for the current OS.
pub fn detect() -> Capabilities {
    #[cfg(target_os = "linux")]
    {
        Capabilities {
            input: Arc::new(linux::XdotoolInput),
            capture: Arc::new(linux::ImportCapture),
            sampler: Arc::new(linux::ProcMetrics::new()),
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        tracing::warn!("no platform capabilities for this OS; input and capture are disabled");
        Capabilities {
            input: Arc::new(UnavailableInput),
            capture: Arc::new(UnavailableCapture),
            sampler: Arc::new(UnavailableSampler),
        }
    }
}

// ── Fallbacks ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableInput;

#[async_trait]
impl InputExecutor for UnavailableInput {
    async fn move_pointer_by(&self, _dx: f64, _dy: f64) -> Result<(), ExecutionError> {
        Err(ExecutionError::Unavailable)
    }

    async fn drag_pointer_by(&self, _dx: f64, _dy: f64) -> Result<(), ExecutionError> {
        Err(ExecutionError::Unavailable)
    }

    async fn click(&self, _button: MouseButton, _double: bool) -> Result<(), ExecutionError> {
        Err(ExecutionError::Unavailable)
    }

    async fn toggle_button(&self, _button: MouseButton, _down: bool) -> Result<(), ExecutionError> {
        Err(ExecutionError::Unavailable)
    }

    async fn scroll(&self, _dy: f64) -> Result<(), ExecutionError> {
        Err(ExecutionError::Unavailable)
    }

    async fn key_tap(&self, _key: &str, _modifiers: &[String]) -> Result<(), ExecutionError> {
        Err(ExecutionError::Unavailable)
    }

    async fn type_text(&self, _text: &str) -> Result<(), ExecutionError> {
        Err(ExecutionError::Unavailable)
    }

    async fn system_control(&self, _action: SystemAction) -> Result<(), ExecutionError> {
        Err(ExecutionError::Unavailable)
    }

    async fn open_path(&self, _path: &str) -> Result<(), ExecutionError> {
        Err(ExecutionError::Unavailable)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCapture;

#[async_trait]
impl ScreenCapture for UnavailableCapture {
    async fn capture(&self, _display_id: u32) -> Result<Vec<u8>, CaptureError> {
        Err(CaptureError::Unavailable)
    }

    async fn list_displays(&self) -> Result<Vec<DisplayInfo>, CaptureError> {
        Err(CaptureError::Unavailable)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSampler;

#[async_trait]
impl MetricsSampler for UnavailableSampler {
    async fn sample(&self) -> Result<SystemSnapshot, StatsError> {
        Err(StatsError("no sampler for this OS".into()))
    }
}
