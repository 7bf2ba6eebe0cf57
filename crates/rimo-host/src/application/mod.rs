//! Application layer for rimo-host.
//!
//! Everything here is transport-agnostic.  Sockets live in the
//! infrastructure layer and talk to this layer through [`hub::HubEvent`]s;
//! the OS is reached only through the capability traits
//! ([`InputExecutor`], [`ScreenCapture`], [`MetricsSampler`]).

pub mod capture_loop;
pub mod command_channel;
pub mod hub;
pub mod relay_bridge;
pub mod session_registry;
pub mod stats;
pub mod task;

pub use capture_loop::{CaptureError, CaptureLoop, FrameSink, ScreenCapture};
pub use command_channel::{CommandChannel, ExecutionError, InputExecutor};
pub use hub::{Hub, HubEvent, HubServices, HubSettings};
pub use relay_bridge::{RelayBridge, RelayListener};
pub use session_registry::SessionRegistry;
pub use stats::{MetricsSampler, StatsError, SystemSnapshot};
pub use task::TaskGuard;
