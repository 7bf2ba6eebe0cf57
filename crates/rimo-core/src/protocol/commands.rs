//! The command schema shared by the direct channel and the relay log.
//!
//! # JSON discriminant
//!
//! Every command is a JSON object with a `"type"` field naming the variant in
//! kebab-case.  All other fields are flattened into the same object:
//!
//! ```json
//! {"type":"mouse-move","dx":10,"dy":-5,"sensitivity":2}
//! {"type":"key-tap","key":"c","modifiers":["command"]}
//! {"type":"stop-mirroring"}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` handles this automatically.  Unknown
//! `type` values fail to deserialize, so nothing untyped ever crosses the
//! boundary into the dispatcher.
//!
//! # Routing
//!
//! [`Command::route`] tells the receiving host service what to do with a
//! command: execute it with the local input capability, handle it as session
//! control, or forward it unchanged to the other devices in the session.

use serde::{Deserialize, Serialize};

use crate::domain::device::{ConnectionId, DeviceRole, DeviceSummary, OwnerId};

fn default_sensitivity() -> f64 {
    1.0
}

/// Mouse button named by click and toggle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// System-level actions understood by `system-control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemAction {
    Sleep,
    Lock,
    VolumeUp,
    VolumeDown,
    Mute,
    BrightnessUp,
    BrightnessDown,
    DisplaySettings,
}

/// Keys of a `custom-macro`: either a single key or a sequence.
///
/// Each key in a sequence is tapped in order with the same modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MacroKeys {
    Many(Vec<String>),
    One(String),
}

impl MacroKeys {
    /// Returns the keys in tap order.
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Many(keys) => keys,
            Self::One(key) => std::slice::from_ref(key),
        }
    }
}

/// One monitor reported by `displays-list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub id: u32,
    pub name: String,
}

/// Notices a host pushes to a controller with `pc-to-mobile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerNoticeKind {
    Ping,
    Vibrate,
    Alert,
    OpenUrl,
}

/// Reports a controller pushes to a host with `mobile-to-pc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MobileReportKind {
    Status,
}

/// What the receiving host service does with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Run through the host's input capability.
    ExecuteOnHost,
    /// Handled by the session layer itself (roles, mirroring, display queries).
    Session,
    /// Forwarded unchanged to every other device in the session.
    Forward,
}

/// Every message carried by the direct channel or the relay log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    /// Declares the sender's role (and optionally its owner identity).
    SetRole {
        role: DeviceRole,
        #[serde(default, rename = "ownerId", skip_serializing_if = "Option::is_none")]
        owner_id: Option<OwnerId>,
    },

    /// Relative pointer movement in pixels, scaled by `sensitivity` at the
    /// executing side.
    MouseMove {
        dx: f64,
        dy: f64,
        #[serde(default = "default_sensitivity")]
        sensitivity: f64,
    },

    /// Relative pointer movement with the left button held.
    MouseDrag {
        dx: f64,
        dy: f64,
        #[serde(default = "default_sensitivity")]
        sensitivity: f64,
    },

    /// A discrete click, already classified as a tap by the sender.
    MouseClick {
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        double: bool,
    },

    /// Presses or releases a button without moving.
    MouseToggle {
        down: bool,
        #[serde(default)]
        button: MouseButton,
    },

    /// Raw vertical scroll delta; the executing side inverts and scales it.
    MouseScroll { dy: f64 },

    KeyTap {
        key: String,
        #[serde(default)]
        modifiers: Vec<String>,
    },

    TypeString { text: String },

    CustomMacro {
        keys: MacroKeys,
        #[serde(default)]
        modifiers: Vec<String>,
    },

    SystemControl { action: SystemAction },

    OpenPath { path: String },

    /// Media key name (e.g. `audio_play`), tapped on the host.
    MediaControl { action: String },

    SyncClipboard { text: String },

    GetScreenshot {
        #[serde(default, rename = "displayId")]
        display_id: u32,
    },

    StartMirroring {
        #[serde(default, rename = "displayId")]
        display_id: u32,
    },

    StopMirroring {},

    GetDisplays {},

    DisplaysList { displays: Vec<DisplayInfo> },

    /// A frame of the controller's own screen, forwarded to the host UI.
    MobileScreenData { blob: String },

    /// Normalised pointer position on the controller's mirrored screen.
    MobileInput { x: f64, y: f64 },

    PcToMobile {
        kind: PeerNoticeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    MobileToPc {
        kind: MobileReportKind,
        #[serde(default)]
        battery: Option<u8>,
        #[serde(default)]
        charging: Option<bool>,
    },

    SystemStats {
        cpu: u8,
        mem: u8,
        battery: Option<u8>,
        #[serde(rename = "isCharging")]
        is_charging: bool,
    },

    /// Fan-out of the currently registered peers, excluding the recipient.
    DevicesList { devices: Vec<DeviceSummary> },

    DeviceLeft { id: ConnectionId },

    /// One captured host frame as a `data:` URL.
    ScreenshotData { blob: String },
}

impl Command {
    /// Returns the wire `type` name without exposing any field values.
    ///
    /// Used in log messages so typed text and clipboard contents never end
    /// up in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SetRole { .. } => "set-role",
            Self::MouseMove { .. } => "mouse-move",
            Self::MouseDrag { .. } => "mouse-drag",
            Self::MouseClick { .. } => "mouse-click",
            Self::MouseToggle { .. } => "mouse-toggle",
            Self::MouseScroll { .. } => "mouse-scroll",
            Self::KeyTap { .. } => "key-tap",
            Self::TypeString { .. } => "type-string",
            Self::CustomMacro { .. } => "custom-macro",
            Self::SystemControl { .. } => "system-control",
            Self::OpenPath { .. } => "open-path",
            Self::MediaControl { .. } => "media-control",
            Self::SyncClipboard { .. } => "sync-clipboard",
            Self::GetScreenshot { .. } => "get-screenshot",
            Self::StartMirroring { .. } => "start-mirroring",
            Self::StopMirroring {} => "stop-mirroring",
            Self::GetDisplays {} => "get-displays",
            Self::DisplaysList { .. } => "displays-list",
            Self::MobileScreenData { .. } => "mobile-screen-data",
            Self::MobileInput { .. } => "mobile-input",
            Self::PcToMobile { .. } => "pc-to-mobile",
            Self::MobileToPc { .. } => "mobile-to-pc",
            Self::SystemStats { .. } => "system-stats",
            Self::DevicesList { .. } => "devices-list",
            Self::DeviceLeft { .. } => "device-left",
            Self::ScreenshotData { .. } => "screenshot-data",
        }
    }

    /// Decides how a host service treats this command.
    ///
    /// Only the host owns the input capability, so input commands execute
    /// there.  Everything addressed to a controller or to the host's UI is
    /// forwarded; at most one device acts on it because only the device with
    /// the matching capability interprets it.
    pub fn route(&self) -> Route {
        match self {
            Self::MouseMove { .. }
            | Self::MouseDrag { .. }
            | Self::MouseClick { .. }
            | Self::MouseToggle { .. }
            | Self::MouseScroll { .. }
            | Self::KeyTap { .. }
            | Self::TypeString { .. }
            | Self::CustomMacro { .. }
            | Self::SystemControl { .. }
            | Self::OpenPath { .. }
            | Self::MediaControl { .. } => Route::ExecuteOnHost,

            Self::SetRole { .. }
            | Self::GetScreenshot { .. }
            | Self::StartMirroring { .. }
            | Self::StopMirroring {}
            | Self::GetDisplays {} => Route::Session,

            Self::SyncClipboard { .. }
            | Self::DisplaysList { .. }
            | Self::MobileScreenData { .. }
            | Self::MobileInput { .. }
            | Self::PcToMobile { .. }
            | Self::MobileToPc { .. }
            | Self::SystemStats { .. }
            | Self::DevicesList { .. }
            | Self::DeviceLeft { .. }
            | Self::ScreenshotData { .. } => Route::Forward,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
