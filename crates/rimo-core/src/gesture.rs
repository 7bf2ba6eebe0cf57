//! Sender-side touch gesture classification.
//!
//! The controller's touch surface produces raw samples; this module turns
//! them into discrete commands *before* anything is sent, so the channel
//! only ever carries `mouse-move`, `mouse-scroll`, `mouse-click`, and the
//! draw-mode `mouse-toggle`/`mouse-drag` pair.
//!
//! # Rules
//!
//! | Gesture | Command |
//! |---------|---------|
//! | one finger moving | `mouse-move {dx, dy, sensitivity}` |
//! | two fingers moving vertically | `mouse-scroll {dy}` with `dy = (prevY − y) × 0.1 × scrollSensitivity`, only when `|dy| > 0.3` |
//! | lifted within 250 ms after < 10 px of travel, one finger | `mouse-click left` |
//! | same, two fingers | `mouse-click right` |
//! | two fingers lifted after a scroll that travelled < 30 px | `mouse-click right` |
//!
//! In [`GestureMode::Draw`] the left button is held from touch start to
//! touch end and every movement is a `mouse-drag`.

use std::time::{Duration, Instant};

use crate::protocol::commands::{Command, MouseButton};

/// Longest touch that still counts as a tap.
pub const TAP_MAX_DURATION: Duration = Duration::from_millis(250);

/// Longest travel (in surface pixels) that still counts as a tap.
pub const TAP_MAX_TRAVEL: f64 = 10.0;

/// Travel below which lifting two fingers after a scroll is a right click.
pub const SCROLL_RELEASE_CLICK_TRAVEL: f64 = 30.0;

const SCROLL_FACTOR: f64 = 0.1;
const SCROLL_MIN_DELTA: f64 = 0.3;

/// One touch point in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub x: f64,
    pub y: f64,
}

impl TouchPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// What single-finger movement means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GestureMode {
    /// Trackpad: move the pointer.
    #[default]
    Pointer,
    /// Drawing: hold the left button while moving.
    Draw,
}

/// Multipliers applied on the sending side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureSettings {
    /// Carried in `mouse-move`/`mouse-drag`; applied by the executing host.
    pub sensitivity: f64,
    /// Applied here to two-finger scroll deltas.
    pub scroll_sensitivity: f64,
}

impl Default for GestureSettings {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            scroll_sensitivity: 1.0,
        }
    }
}

/// Tracks one touch sequence at a time and emits the commands it implies.
#[derive(Debug)]
pub struct GestureTracker {
    mode: GestureMode,
    settings: GestureSettings,
    fingers: usize,
    last: TouchPoint,
    started_at: Option<Instant>,
    travelled: f64,
    scrolling: bool,
    scroll_anchor_y: f64,
}

impl GestureTracker {
    pub fn new(mode: GestureMode, settings: GestureSettings) -> Self {
        Self {
            mode,
            settings,
            fingers: 0,
            last: TouchPoint::new(0.0, 0.0),
            started_at: None,
            travelled: 0.0,
            scrolling: false,
            scroll_anchor_y: 0.0,
        }
    }

    pub fn set_mode(&mut self, mode: GestureMode) {
        self.mode = mode;
    }

    pub fn set_settings(&mut self, settings: GestureSettings) {
        self.settings = settings;
    }

    /// Starts a touch sequence.  Returns the draw-mode button press, if any.
    pub fn begin(&mut self, touches: &[TouchPoint], at: Instant) -> Vec<Command> {
        let Some(first) = touches.first() else {
            return Vec::new();
        };
        self.fingers = touches.len();
        self.last = *first;
        self.started_at = Some(at);
        self.travelled = 0.0;
        self.scrolling = false;

        if let [a, b, ..] = touches {
            self.scroll_anchor_y = (a.y + b.y) / 2.0;
            self.scrolling = true;
        }

        match self.mode {
            GestureMode::Draw => vec![Command::MouseToggle {
                down: true,
                button: MouseButton::Left,
            }],
            GestureMode::Pointer => Vec::new(),
        }
    }

    /// Feeds the current touch positions.
    pub fn update(&mut self, touches: &[TouchPoint]) -> Vec<Command> {
        let Some(first) = touches.first().copied() else {
            return Vec::new();
        };
        if self.started_at.is_none() {
            return Vec::new();
        }

        let dx = first.x - self.last.x;
        let dy = first.y - self.last.y;
        self.travelled += (dx * dx + dy * dy).sqrt();
        self.last = first;

        let sensitivity = self.settings.sensitivity;
        match (self.mode, touches) {
            (GestureMode::Draw, _) => vec![Command::MouseDrag {
                dx,
                dy,
                sensitivity,
            }],
            (GestureMode::Pointer, [_]) if !self.scrolling => vec![Command::MouseMove {
                dx,
                dy,
                sensitivity,
            }],
            (GestureMode::Pointer, [a, b, ..]) => {
                let y = (a.y + b.y) / 2.0;
                let delta =
                    (self.scroll_anchor_y - y) * SCROLL_FACTOR * self.settings.scroll_sensitivity;
                if delta.abs() > SCROLL_MIN_DELTA {
                    self.scroll_anchor_y = y;
                    vec![Command::MouseScroll { dy: delta }]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Ends the sequence, classifying it as a tap when it qualifies.
    pub fn end(&mut self, at: Instant) -> Vec<Command> {
        let Some(started_at) = self.started_at.take() else {
            return Vec::new();
        };
        let duration = at.saturating_duration_since(started_at);
        let mut out = Vec::new();

        let click = |button| Command::MouseClick {
            button,
            double: false,
        };
        if duration < TAP_MAX_DURATION && self.travelled < TAP_MAX_TRAVEL {
            match self.fingers {
                1 => out.push(click(MouseButton::Left)),
                2 => out.push(click(MouseButton::Right)),
                _ => {}
            }
        } else if self.fingers == 2
            && self.scrolling
            && self.travelled < SCROLL_RELEASE_CLICK_TRAVEL
        {
            out.push(click(MouseButton::Right));
        }

        if self.mode == GestureMode::Draw {
            out.push(Command::MouseToggle {
                down: false,
                button: MouseButton::Left,
            });
        }
        self.scrolling = false;
        out
    }
}

impl Default for GestureTracker {
    fn default() -> Self {
        Self::new(GestureMode::Pointer, GestureSettings::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> TouchPoint {
        TouchPoint::new(x, y)
    }

    fn left_click() -> Command {
        Command::MouseClick {
            button: MouseButton::Left,
            double: false,
        }
    }

    fn right_click() -> Command {
        Command::MouseClick {
            button: MouseButton::Right,
            double: false,
        }
    }

    #[test]
    fn test_short_still_touch_is_left_click() {
        let mut g = GestureTracker::default();
        let t0 = Instant::now();
        g.begin(&[p(100.0, 100.0)], t0);
        g.update(&[p(103.0, 104.0)]); // 5 px
        let out = g.end(t0 + Duration::from_millis(120));
        assert_eq!(out, vec![left_click()]);
    }

    #[test]
    fn test_slow_touch_is_not_a_tap() {
        let mut g = GestureTracker::default();
        let t0 = Instant::now();
        g.begin(&[p(0.0, 0.0)], t0);
        assert!(g.end(t0 + Duration::from_millis(250)).is_empty());
    }

    #[test]
    fn test_long_travel_is_not_a_tap() {
        let mut g = GestureTracker::default();
        let t0 = Instant::now();
        g.begin(&[p(0.0, 0.0)], t0);
        g.update(&[p(6.0, 8.0)]); // 10 px
        assert!(g.end(t0 + Duration::from_millis(50)).is_empty());
    }

    #[test]
    fn test_one_finger_move_carries_sensitivity() {
        let mut g = GestureTracker::new(
            GestureMode::Pointer,
            GestureSettings {
                sensitivity: 2.0,
                scroll_sensitivity: 1.0,
            },
        );
        g.begin(&[p(10.0, 10.0)], Instant::now());
        let out = g.update(&[p(20.0, 5.0)]);
        assert_eq!(
            out,
            vec![Command::MouseMove {
                dx: 10.0,
                dy: -5.0,
                sensitivity: 2.0
            }]
        );
    }

    #[test]
    fn test_two_finger_tap_is_right_click() {
        let mut g = GestureTracker::default();
        let t0 = Instant::now();
        g.begin(&[p(0.0, 0.0), p(40.0, 0.0)], t0);
        assert_eq!(g.end(t0 + Duration::from_millis(100)), vec![right_click()]);
    }

    #[test]
    fn test_two_finger_drag_scrolls_inverted_and_scaled() {
        let mut g = GestureTracker::new(
            GestureMode::Pointer,
            GestureSettings {
                sensitivity: 1.0,
                scroll_sensitivity: 3.0,
            },
        );
        g.begin(&[p(0.0, 100.0), p(40.0, 100.0)], Instant::now());

        let out = g.update(&[p(0.0, 80.0), p(40.0, 80.0)]);

        // (100 - 80) * 0.1 * 3.0
        match out.as_slice() {
            [Command::MouseScroll { dy }] => assert!((dy - 6.0).abs() < 1e-9),
            other => panic!("expected one scroll, got {other:?}"),
        }
    }

    #[test]
    fn test_tiny_scroll_delta_is_suppressed() {
        let mut g = GestureTracker::default();
        g.begin(&[p(0.0, 100.0), p(40.0, 100.0)], Instant::now());
        // (100 - 98) * 0.1 = 0.2 <= 0.3
        assert!(g.update(&[p(0.0, 98.0), p(40.0, 98.0)]).is_empty());
    }

    #[test]
    fn test_two_fingers_released_after_short_scroll_is_right_click() {
        let mut g = GestureTracker::default();
        let t0 = Instant::now();
        g.begin(&[p(0.0, 100.0), p(40.0, 100.0)], t0);
        g.update(&[p(0.0, 80.0), p(40.0, 80.0)]); // 20 px
        let out = g.end(t0 + Duration::from_millis(600));
        assert_eq!(out, vec![right_click()]);
    }

    #[test]
    fn test_long_scroll_release_emits_nothing() {
        let mut g = GestureTracker::default();
        let t0 = Instant::now();
        g.begin(&[p(0.0, 200.0), p(40.0, 200.0)], t0);
        g.update(&[p(0.0, 150.0), p(40.0, 150.0)]); // 50 px
        assert!(g.end(t0 + Duration::from_millis(600)).is_empty());
    }

    #[test]
    fn test_draw_mode_holds_button_across_sequence() {
        let mut g = GestureTracker::new(GestureMode::Draw, GestureSettings::default());
        let t0 = Instant::now();

        let down = g.begin(&[p(0.0, 0.0)], t0);
        let drag = g.update(&[p(30.0, 0.0)]);
        let up = g.end(t0 + Duration::from_secs(1));

        assert_eq!(
            down,
            vec![Command::MouseToggle {
                down: true,
                button: MouseButton::Left
            }]
        );
        assert!(matches!(drag.as_slice(), [Command::MouseDrag { dx, .. }] if *dx == 30.0));
        assert_eq!(
            up,
            vec![Command::MouseToggle {
                down: false,
                button: MouseButton::Left
            }]
        );
    }

    #[test]
    fn test_update_without_begin_is_ignored() {
        let mut g = GestureTracker::default();
        assert!(g.update(&[p(5.0, 5.0)]).is_empty());
        assert!(g.end(Instant::now()).is_empty());
    }
}
