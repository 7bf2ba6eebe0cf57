//! Linux capabilities built on common desktop tools.
//!
//! | Capability       | Tool                                               |
//! |------------------|----------------------------------------------------|
//! | pointer/keyboard | `xdotool`                                          |
//! | system actions   | `systemctl`, `loginctl`, `pactl`, `brightnessctl`  |
//! | open path        | `xdg-open`                                         |
//! | screen capture   | `xrandr --listmonitors` + ImageMagick `import`     |
//! | metrics          | `/proc/stat`, `/proc/meminfo`, `/sys/class/power_supply` |
//!
//! A missing tool maps to the capability's `Unavailable` error; a tool that
//! exits non-zero maps to `Platform`.

use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command as Process;

use rimo_core::protocol::commands::{DisplayInfo, MouseButton, SystemAction};

use crate::application::capture_loop::{CaptureError, ScreenCapture};
use crate::application::command_channel::{ExecutionError, InputExecutor};
use crate::application::stats::{MetricsSampler, StatsError, SystemSnapshot};

const JPEG_QUALITY: &str = "60";

// ── Input ─────────────────────────────────────────────────────────────────────

/// Injects input through `xdotool`.
#[derive(Debug, Default, Clone, Copy)]
pub struct XdotoolInput;

/// A child process that is killed if the future awaiting it is dropped, so
/// an aborted mirror or worker task never leaves a tool running.
fn process(program: &str, args: &[&str]) -> Process {
    let mut cmd = Process::new(program);
    cmd.args(args).kill_on_drop(true);
    cmd
}

async fn run(program: &str, args: &[&str]) -> Result<(), ExecutionError> {
    let status = process(program, args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => ExecutionError::Unavailable,
            _ => ExecutionError::Platform(format!("{program}: {e}")),
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(ExecutionError::Platform(format!("{program} exited with {status}")))
    }
}

fn button_number(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "1",
        MouseButton::Middle => "2",
        MouseButton::Right => "3",
    }
}

/// Maps a key name as sent by controllers to an X keysym.
pub fn keysym(key: &str) -> String {
    let lower = key.to_ascii_lowercase();
    let mapped = match lower.as_str() {
        "enter" | "return" => "Return",
        "backspace" => "BackSpace",
        "tab" => "Tab",
        "escape" | "esc" => "Escape",
        "space" => "space",
        "delete" => "Delete",
        "up" => "Up",
        "down" => "Down",
        "left" => "Left",
        "right" => "Right",
        "home" => "Home",
        "end" => "End",
        "pageup" => "Prior",
        "pagedown" => "Next",
        "control" | "ctrl" => "ctrl",
        "shift" => "shift",
        "alt" | "option" => "alt",
        "command" | "cmd" | "meta" | "super" => "super",
        "audio_play" | "audio_pause" => "XF86AudioPlay",
        "audio_stop" => "XF86AudioStop",
        "audio_next" => "XF86AudioNext",
        "audio_prev" => "XF86AudioPrev",
        "audio_vol_up" => "XF86AudioRaiseVolume",
        "audio_vol_down" => "XF86AudioLowerVolume",
        "audio_mute" => "XF86AudioMute",
        f if f.len() <= 3 && f.starts_with('f') && f[1..].parse::<u8>().is_ok() => {
            return f.to_ascii_uppercase();
        }
        _ => return key.to_string(),
    };
    mapped.to_string()
}

/// `modifiers` and `key` joined the way `xdotool key` expects.
pub fn key_combo(key: &str, modifiers: &[String]) -> String {
    modifiers
        .iter()
        .map(|m| keysym(m))
        .chain(std::iter::once(keysym(key)))
        .collect::<Vec<_>>()
        .join("+")
}

/// Program and arguments for a system action.
pub fn system_command(action: SystemAction) -> (&'static str, &'static [&'static str]) {
    match action {
        SystemAction::Sleep => ("systemctl", &["suspend"]),
        SystemAction::Lock => ("loginctl", &["lock-session"]),
        SystemAction::VolumeUp => ("pactl", &["set-sink-volume", "@DEFAULT_SINK@", "+6%"]),
        SystemAction::VolumeDown => ("pactl", &["set-sink-volume", "@DEFAULT_SINK@", "-6%"]),
        SystemAction::Mute => ("pactl", &["set-sink-mute", "@DEFAULT_SINK@", "1"]),
        SystemAction::BrightnessUp => ("brightnessctl", &["set", "+10%"]),
        SystemAction::BrightnessDown => ("brightnessctl", &["set", "10%-"]),
        SystemAction::DisplaySettings => ("gnome-control-center", &["display"]),
    }
}

#[async_trait]
impl InputExecutor for XdotoolInput {
    async fn move_pointer_by(&self, dx: f64, dy: f64) -> Result<(), ExecutionError> {
        let (x, y) = (format!("{:.0}", dx), format!("{:.0}", dy));
        run("xdotool", &["mousemove_relative", "--", &x, &y]).await
    }

    async fn drag_pointer_by(&self, dx: f64, dy: f64) -> Result<(), ExecutionError> {
        let (x, y) = (format!("{:.0}", dx), format!("{:.0}", dy));
        run(
            "xdotool",
            &["mousedown", "1", "mousemove_relative", "--", &x, &y, "mouseup", "1"],
        )
        .await
    }

    async fn click(&self, button: MouseButton, double: bool) -> Result<(), ExecutionError> {
        let repeat = if double { "2" } else { "1" };
        run("xdotool", &["click", "--repeat", repeat, button_number(button)]).await
    }

    async fn toggle_button(&self, button: MouseButton, down: bool) -> Result<(), ExecutionError> {
        let verb = if down { "mousedown" } else { "mouseup" };
        run("xdotool", &[verb, button_number(button)]).await
    }

    async fn scroll(&self, dy: f64) -> Result<(), ExecutionError> {
        if dy == 0.0 {
            return Ok(());
        }
        // X buttons 4 and 5 scroll up and down by one notch.
        let wheel = if dy > 0.0 { "5" } else { "4" };
        let notches = dy.abs().ceil().min(50.0).to_string();
        run("xdotool", &["click", "--repeat", &notches, wheel]).await
    }

    async fn key_tap(&self, key: &str, modifiers: &[String]) -> Result<(), ExecutionError> {
        let combo = key_combo(key, modifiers);
        run("xdotool", &["key", "--", &combo]).await
    }

    async fn type_text(&self, text: &str) -> Result<(), ExecutionError> {
        run("xdotool", &["type", "--delay", "0", "--", text]).await
    }

    async fn system_control(&self, action: SystemAction) -> Result<(), ExecutionError> {
        let (program, args) = system_command(action);
        run(program, args).await
    }

    async fn open_path(&self, path: &str) -> Result<(), ExecutionError> {
        run("xdg-open", &[path]).await
    }
}

// ── Screen capture ────────────────────────────────────────────────────────────

/// One monitor as reported by `xrandr --listmonitors`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub id: u32,
    pub name: String,
    /// `WxH+X+Y`, suitable for `import -crop`.
    pub geometry: String,
}

/// Parses `xrandr --listmonitors` output.
///
/// ```text
/// Monitors: 2
///  0: +*eDP-1 1920/344x1080/193+0+0  eDP-1
///  1: +HDMI-1 2560/597x1440/336+1920+0  HDMI-1
/// ```
pub fn parse_monitors(text: &str) -> Vec<Monitor> {
    text.lines()
        .filter_map(|line| {
            let (index, rest) = line.trim().split_once(':')?;
            let id = index.trim().parse().ok()?;
            let mut fields = rest.split_whitespace();
            let _flags_and_name = fields.next()?;
            let raw_geometry = fields.next()?;
            let name = fields.next()?.to_string();
            Some(Monitor {
                id,
                name,
                geometry: strip_physical_size(raw_geometry)?,
            })
        })
        .collect()
}

/// `1920/344x1080/193+0+0` → `1920x1080+0+0`.
fn strip_physical_size(raw: &str) -> Option<String> {
    let (w, rest) = raw.split_once('x')?;
    let width = w.split('/').next()?;
    let (h, offsets) = match rest.find('+') {
        Some(i) => rest.split_at(i),
        None => return None,
    };
    let height = h.split('/').next()?;
    Some(format!("{width}x{height}{offsets}"))
}

/// Grabs the X root window with ImageMagick.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportCapture;

async fn output(program: &str, args: &[&str]) -> Result<Vec<u8>, CaptureError> {
    let out = process(program, args)
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => CaptureError::Unavailable,
            _ => CaptureError::Platform(format!("{program}: {e}")),
        })?;
    if out.status.success() {
        Ok(out.stdout)
    } else {
        Err(CaptureError::Platform(format!(
            "{program} exited with {}",
            out.status
        )))
    }
}

impl ImportCapture {
    async fn monitors(&self) -> Result<Vec<Monitor>, CaptureError> {
        let text = output("xrandr", &["--listmonitors"]).await?;
        Ok(parse_monitors(&String::from_utf8_lossy(&text)))
    }
}

#[async_trait]
impl ScreenCapture for ImportCapture {
    async fn capture(&self, display_id: u32) -> Result<Vec<u8>, CaptureError> {
        let monitors = self.monitors().await.unwrap_or_default();
        let crop = match monitors.iter().find(|m| m.id == display_id) {
            Some(m) => Some(m.geometry.clone()),
            None if display_id == 0 => None,
            None => return Err(CaptureError::NoSuchDisplay(display_id)),
        };

        let mut args = vec!["-window", "root"];
        if let Some(geometry) = crop.as_deref() {
            args.extend(["-crop", geometry, "+repage"]);
        }
        args.extend(["-quality", JPEG_QUALITY, "jpeg:-"]);
        output("import", &args).await
    }

    async fn list_displays(&self) -> Result<Vec<DisplayInfo>, CaptureError> {
        Ok(self
            .monitors()
            .await?
            .into_iter()
            .map(|m| DisplayInfo {
                id: m.id,
                name: m.name,
            })
            .collect())
    }
}

// ── Metrics ───────────────────────────────────────────────────────────────────

/// Aggregate CPU jiffies from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

pub fn parse_proc_stat(text: &str) -> Option<CpuTimes> {
    let line = text.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

/// Busy share between two samples, in percent.
pub fn cpu_percent(prev: CpuTimes, now: CpuTimes) -> u8 {
    let total = now.total.saturating_sub(prev.total);
    if total == 0 {
        return 0;
    }
    let busy = now.busy.saturating_sub(prev.busy);
    ((busy as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

/// Percent of memory not available for new allocations.
pub fn parse_meminfo(text: &str) -> Option<u8> {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available) as f64 / total as f64;
    Some((used * 100.0).round().min(100.0) as u8)
}

/// Samples `/proc` and the first battery under `/sys/class/power_supply`.
#[derive(Debug, Default)]
pub struct ProcMetrics {
    prev_cpu: Mutex<CpuTimes>,
}

impl ProcMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    async fn battery(&self) -> (Option<u8>, bool) {
        let Ok(mut dir) = tokio::fs::read_dir("/sys/class/power_supply").await else {
            return (None, false);
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            let Ok(kind) = tokio::fs::read_to_string(path.join("type")).await else {
                continue;
            };
            if kind.trim() != "Battery" {
                continue;
            }
            let capacity = tokio::fs::read_to_string(path.join("capacity"))
                .await
                .ok()
                .and_then(|c| c.trim().parse::<u8>().ok());
            let charging = tokio::fs::read_to_string(path.join("status"))
                .await
                .is_ok_and(|s| s.trim() == "Charging");
            return (capacity, charging);
        }
        (None, false)
    }
}

#[async_trait]
impl MetricsSampler for ProcMetrics {
    async fn sample(&self) -> Result<SystemSnapshot, StatsError> {
        let stat = tokio::fs::read_to_string("/proc/stat")
            .await
            .map_err(|e| StatsError(format!("/proc/stat: {e}")))?;
        let meminfo = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .map_err(|e| StatsError(format!("/proc/meminfo: {e}")))?;

        let now = parse_proc_stat(&stat).ok_or_else(|| StatsError("unreadable /proc/stat".into()))?;
        let cpu = {
            let mut prev = self
                .prev_cpu
                .lock()
                .map_err(|_| StatsError("cpu sample lock poisoned".into()))?;
            let pct = cpu_percent(*prev, now);
            *prev = now;
            pct
        };
        let mem = parse_meminfo(&meminfo).ok_or_else(|| StatsError("unreadable /proc/meminfo".into()))?;
        let (battery, is_charging) = self.battery().await;

        Ok(SystemSnapshot {
            cpu,
            mem,
            battery,
            is_charging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dropped_tool_call_kills_the_child() {
        // Arrange
        let marker = std::env::temp_dir().join(format!("rimo-kill-{}", uuid::Uuid::new_v4()));
        let script = format!("sleep 0.3; touch {}", marker.display());

        // Act
        let args = ["-c", script.as_str()];
        let pending = output("sh", &args);
        let timed_out = tokio::time::timeout(Duration::from_millis(50), pending).await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        // Assert
        assert!(timed_out.is_err());
        assert!(!marker.exists(), "child outlived the dropped call");
    }

    #[test]
    fn test_keysym_maps_controller_names() {
        assert_eq!(keysym("enter"), "Return");
        assert_eq!(keysym("audio_vol_up"), "XF86AudioRaiseVolume");
        assert_eq!(keysym("f5"), "F5");
        assert_eq!(keysym("a"), "a");
    }

    #[test]
    fn test_key_combo_puts_modifiers_first() {
        let combo = key_combo("c", &["command".into(), "shift".into()]);
        assert_eq!(combo, "super+shift+c");
    }

    #[test]
    fn test_every_system_action_has_a_command() {
        for action in [
            SystemAction::Sleep,
            SystemAction::Lock,
            SystemAction::VolumeUp,
            SystemAction::VolumeDown,
            SystemAction::Mute,
            SystemAction::BrightnessUp,
            SystemAction::BrightnessDown,
            SystemAction::DisplaySettings,
        ] {
            let (program, _) = system_command(action);
            assert!(!program.is_empty());
        }
    }

    #[test]
    fn test_parse_monitors() {
        let text = "Monitors: 2\n 0: +*eDP-1 1920/344x1080/193+0+0  eDP-1\n 1: +HDMI-1 2560/597x1440/336+1920+0  HDMI-1\n";
        let monitors = parse_monitors(text);
        assert_eq!(
            monitors,
            vec![
                Monitor {
                    id: 0,
                    name: "eDP-1".into(),
                    geometry: "1920x1080+0+0".into()
                },
                Monitor {
                    id: 1,
                    name: "HDMI-1".into(),
                    geometry: "2560x1440+1920+0".into()
                },
            ]
        );
    }

    #[test]
    fn test_cpu_percent_between_samples() {
        // Arrange
        let a = parse_proc_stat("cpu  100 0 100 800 0 0 0 0 0 0\n").unwrap();
        let b = parse_proc_stat("cpu  150 0 150 900 0 0 0 0 0 0\n").unwrap();

        // Act / Assert: 100 busy jiffies of 200.
        assert_eq!(cpu_percent(a, b), 50);
        assert_eq!(cpu_percent(b, b), 0);
    }

    #[test]
    fn test_parse_meminfo_uses_available() {
        let text = "MemTotal:       1000 kB\nMemFree:         100 kB\nMemAvailable:    250 kB\n";
        assert_eq!(parse_meminfo(text), Some(75));
    }

    #[test]
    fn test_parse_meminfo_rejects_missing_fields() {
        assert_eq!(parse_meminfo("MemTotal: 1000 kB\n"), None);
    }
}
