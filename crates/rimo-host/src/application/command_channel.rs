//! Local execution of input commands.
//!
//! [`CommandChannel`] is the host's dispatch table from a decoded
//! [`Command`] to the [`InputExecutor`] capability.  Routing (execute here,
//! handle in the session layer, or forward to peers) is decided by
//! [`Command::route`]; this module only handles the `ExecuteOnHost` branch.
//!
//! # Numeric semantics
//!
//! - `mouse-move`/`mouse-drag` deltas are multiplied by the command's own
//!   `sensitivity` exactly once, here.
//! - `mouse-scroll` deltas are sign-inverted (natural scrolling) and
//!   multiplied by the host's configured scroll sensitivity.
//!
//! # Failure policy
//!
//! A failing executor call is reported to the caller as an
//! [`ExecutionError`], which the caller logs and drops.  Nothing is retried
//! and nothing is sent back to the peer.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use rimo_core::protocol::commands::{MouseButton, SystemAction};
use rimo_core::Command;

/// Errors from the input capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// No input capability is available on this machine.
    #[error("input capability unavailable")]
    Unavailable,

    /// The platform call failed.
    #[error("platform error: {0}")]
    Platform(String),

    /// The command is not one the host executes.
    #[error("`{0}` is not executed on the host")]
    NotExecutable(&'static str),
}

/// Abstraction over OS input injection.
///
/// Deltas are in screen pixels and already scaled; implementations apply
/// them relative to the current pointer position.
#[async_trait]
pub trait InputExecutor: Send + Sync {
    async fn move_pointer_by(&self, dx: f64, dy: f64) -> Result<(), ExecutionError>;

    /// Moves with the left button held.
    async fn drag_pointer_by(&self, dx: f64, dy: f64) -> Result<(), ExecutionError>;

    async fn click(&self, button: MouseButton, double: bool) -> Result<(), ExecutionError>;

    async fn toggle_button(&self, button: MouseButton, down: bool) -> Result<(), ExecutionError>;

    /// Positive `dy` scrolls content down.
    async fn scroll(&self, dy: f64) -> Result<(), ExecutionError>;

    async fn key_tap(&self, key: &str, modifiers: &[String]) -> Result<(), ExecutionError>;

    async fn type_text(&self, text: &str) -> Result<(), ExecutionError>;

    async fn system_control(&self, action: SystemAction) -> Result<(), ExecutionError>;

    async fn open_path(&self, path: &str) -> Result<(), ExecutionError>;
}

/// Dispatches host-executed commands to an [`InputExecutor`].
pub struct CommandChannel {
    executor: Arc<dyn InputExecutor>,
    scroll_sensitivity: f64,
}

impl CommandChannel {
    pub fn new(executor: Arc<dyn InputExecutor>, scroll_sensitivity: f64) -> Self {
        Self {
            executor,
            scroll_sensitivity,
        }
    }

    /// Executes one command on this machine.
    ///
    /// # Errors
    ///
    /// [`ExecutionError::NotExecutable`] for commands that are not routed to
    /// the host; otherwise whatever the executor reports.
    pub async fn execute(&self, cmd: &Command) -> Result<(), ExecutionError> {
        let exec = &self.executor;
        match cmd {
            Command::MouseMove {
                dx,
                dy,
                sensitivity,
            } => exec.move_pointer_by(dx * sensitivity, dy * sensitivity).await,
            Command::MouseDrag {
                dx,
                dy,
                sensitivity,
            } => exec.drag_pointer_by(dx * sensitivity, dy * sensitivity).await,
            Command::MouseClick { button, double } => exec.click(*button, *double).await,
            Command::MouseToggle { down, button } => exec.toggle_button(*button, *down).await,
            Command::MouseScroll { dy } => exec.scroll(-dy * self.scroll_sensitivity).await,
            Command::KeyTap { key, modifiers } => exec.key_tap(key, modifiers).await,
            Command::TypeString { text } => exec.type_text(text).await,
            Command::CustomMacro { keys, modifiers } => {
                for key in keys.as_slice() {
                    exec.key_tap(key, modifiers).await?;
                }
                Ok(())
            }
            Command::SystemControl { action } => exec.system_control(*action).await,
            Command::OpenPath { path } => exec.open_path(path).await,
            Command::MediaControl { action } => exec.key_tap(action, &[]).await,
            other => Err(ExecutionError::NotExecutable(other.type_name())),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::platform::mock::{InputCall, MockInputExecutor};
    use rimo_core::protocol::commands::MacroKeys;

    fn channel(executor: &Arc<MockInputExecutor>, scroll_sensitivity: f64) -> CommandChannel {
        CommandChannel::new(executor.clone(), scroll_sensitivity)
    }

    #[tokio::test]
    async fn test_mouse_move_is_scaled_by_sensitivity_once() {
        // Arrange
        let executor = Arc::new(MockInputExecutor::new());
        let ch = channel(&executor, 1.0);

        // Act
        ch.execute(&Command::MouseMove {
            dx: 10.0,
            dy: -5.0,
            sensitivity: 2.0,
        })
        .await
        .unwrap();

        // Assert
        assert_eq!(executor.calls(), vec![InputCall::Move(20.0, -10.0)]);
    }

    #[tokio::test]
    async fn test_mouse_drag_is_scaled() {
        let executor = Arc::new(MockInputExecutor::new());
        channel(&executor, 1.0)
            .execute(&Command::MouseDrag {
                dx: 3.0,
                dy: 4.0,
                sensitivity: 1.5,
            })
            .await
            .unwrap();
        assert_eq!(executor.calls(), vec![InputCall::Drag(4.5, 6.0)]);
    }

    #[tokio::test]
    async fn test_scroll_is_inverted_and_scaled() {
        let executor = Arc::new(MockInputExecutor::new());
        channel(&executor, 2.0)
            .execute(&Command::MouseScroll { dy: 3.0 })
            .await
            .unwrap();
        assert_eq!(executor.calls(), vec![InputCall::Scroll(-6.0)]);
    }

    #[tokio::test]
    async fn test_custom_macro_taps_each_key_with_modifiers() {
        let executor = Arc::new(MockInputExecutor::new());
        channel(&executor, 1.0)
            .execute(&Command::CustomMacro {
                keys: MacroKeys::Many(vec!["a".into(), "b".into()]),
                modifiers: vec!["shift".into()],
            })
            .await
            .unwrap();
        assert_eq!(
            executor.calls(),
            vec![
                InputCall::KeyTap("a".into(), vec!["shift".into()]),
                InputCall::KeyTap("b".into(), vec!["shift".into()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_media_control_is_a_bare_key_tap() {
        let executor = Arc::new(MockInputExecutor::new());
        channel(&executor, 1.0)
            .execute(&Command::MediaControl {
                action: "audio_play".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            executor.calls(),
            vec![InputCall::KeyTap("audio_play".into(), vec![])]
        );
    }

    #[tokio::test]
    async fn test_system_control_and_open_path_reach_executor() {
        let executor = Arc::new(MockInputExecutor::new());
        let ch = channel(&executor, 1.0);
        ch.execute(&Command::SystemControl {
            action: SystemAction::Lock,
        })
        .await
        .unwrap();
        ch.execute(&Command::OpenPath {
            path: "/tmp".into(),
        })
        .await
        .unwrap();
        assert_eq!(
            executor.calls(),
            vec![
                InputCall::System(SystemAction::Lock),
                InputCall::OpenPath("/tmp".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_forwarded_commands_are_not_executable() {
        let executor = Arc::new(MockInputExecutor::new());
        let err = channel(&executor, 1.0)
            .execute(&Command::SyncClipboard { text: "x".into() })
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::NotExecutable("sync-clipboard"));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_executor_failure_is_returned() {
        let executor = Arc::new(MockInputExecutor::failing());
        let err = channel(&executor, 1.0)
            .execute(&Command::TypeString { text: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Platform(_)));
    }
}
