//! Turns input lines into commands.
//!
//! Two line forms are accepted:
//!
//! ```text
//! {"type":"key-tap","key":"enter"}       any command, as JSON
//! touch begin 100,200 140,200            touch samples (x,y per finger)
//! touch move 100,180 140,180
//! touch end
//! mode draw | mode pointer               what one-finger movement means
//! ```
//!
//! Touch lines go through the sender-side [`GestureTracker`], so a short
//! `begin`/`end` pair becomes a click and two fingers moving vertically
//! become `mouse-scroll`.  The configured sensitivity is stamped on every
//! `mouse-move` and `mouse-drag`.

use std::time::Instant;

use rimo_core::gesture::{GestureMode, GestureSettings, GestureTracker, TouchPoint};
use rimo_core::{decode_command, Command, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error(transparent)]
    Command(#[from] ProtocolError),

    #[error("bad touch line: {0}")]
    Touch(String),
}

pub struct InputTranslator {
    tracker: GestureTracker,
    settings: GestureSettings,
}

impl InputTranslator {
    pub fn new(settings: GestureSettings) -> Self {
        Self {
            tracker: GestureTracker::new(GestureMode::Pointer, settings),
            settings,
        }
    }

    /// Commands implied by one line, using the current time for touch
    /// timing.
    pub fn translate(&mut self, line: &str) -> Result<Vec<Command>, InputError> {
        self.translate_at(line, Instant::now())
    }

    /// Like [`translate`](Self::translate) with an explicit timestamp.
    pub fn translate_at(&mut self, line: &str, at: Instant) -> Result<Vec<Command>, InputError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(rest) = line.strip_prefix("touch ") {
            return self.touch(rest, at);
        }
        if let Some(mode) = line.strip_prefix("mode ") {
            let mode = match mode.trim() {
                "draw" => GestureMode::Draw,
                "pointer" => GestureMode::Pointer,
                other => return Err(InputError::Touch(format!("unknown mode `{other}`"))),
            };
            self.tracker.set_mode(mode);
            return Ok(Vec::new());
        }
        let cmd = decode_command(line)?;
        Ok(vec![self.with_sensitivity(cmd)])
    }

    fn touch(&mut self, rest: &str, at: Instant) -> Result<Vec<Command>, InputError> {
        let mut parts = rest.split_whitespace();
        let phase = parts.next().unwrap_or_default();
        let points = parts.map(parse_point).collect::<Result<Vec<_>, _>>()?;
        match phase {
            "begin" => Ok(self.tracker.begin(&points, at)),
            "move" => Ok(self.tracker.update(&points)),
            "end" => Ok(self.tracker.end(at)),
            other => Err(InputError::Touch(format!("unknown phase `{other}`"))),
        }
    }

    fn with_sensitivity(&self, cmd: Command) -> Command {
        match cmd {
            Command::MouseMove { dx, dy, .. } => Command::MouseMove {
                dx,
                dy,
                sensitivity: self.settings.sensitivity,
            },
            Command::MouseDrag { dx, dy, .. } => Command::MouseDrag {
                dx,
                dy,
                sensitivity: self.settings.sensitivity,
            },
            other => other,
        }
    }
}

fn parse_point(text: &str) -> Result<TouchPoint, InputError> {
    let bad = || InputError::Touch(format!("expected x,y but got `{text}`"));
    let (x, y) = text.split_once(',').ok_or_else(bad)?;
    let x = x.trim().parse().map_err(|_| bad())?;
    let y = y.trim().parse().map_err(|_| bad())?;
    Ok(TouchPoint::new(x, y))
}
