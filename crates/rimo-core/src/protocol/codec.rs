//! JSON text codec for [`Command`] values.
//!
//! Both transports carry commands as UTF-8 JSON text: the direct channel as
//! one WebSocket text frame per command, the relay log as one entry per
//! command.  Decoding is the trust boundary, so besides the structural check
//! serde performs, [`decode_command`] rejects values no executor should ever
//! see (non-finite deltas, normalised coordinates outside `[0, 1]`,
//! percentages above 100).

use thiserror::Error;

use crate::protocol::commands::Command;

/// Errors that can occur while encoding or decoding a command.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The text is not valid JSON, has an unknown `type`, or a field has the
    /// wrong shape.
    #[error("malformed command: {0}")]
    Json(String),

    /// A numeric field is NaN or infinite.
    #[error("field `{field}` must be a finite number")]
    NonFinite { field: &'static str },

    /// A numeric field lies outside its allowed range.
    #[error("field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a command as compact JSON text.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if serialization fails.
pub fn encode_command(cmd: &Command) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(cmd)?)
}

/// Decodes and validates one command from JSON text.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the text is not a known command or a field
/// fails validation.
///
/// # Examples
///
/// ```rust
/// use rimo_core::{decode_command, Command};
///
/// let cmd = decode_command(r#"{"type":"mouse-scroll","dy":3}"#).unwrap();
/// assert_eq!(cmd, Command::MouseScroll { dy: 3.0 });
/// ```
pub fn decode_command(text: &str) -> Result<Command, ProtocolError> {
    let cmd: Command = serde_json::from_str(text)?;
    validate(&cmd)?;
    Ok(cmd)
}

/// Checks the numeric invariants serde cannot express.
pub fn validate(cmd: &Command) -> Result<(), ProtocolError> {
    match cmd {
        Command::MouseMove {
            dx,
            dy,
            sensitivity,
        }
        | Command::MouseDrag {
            dx,
            dy,
            sensitivity,
        } => {
            finite("dx", *dx)?;
            finite("dy", *dy)?;
            finite("sensitivity", *sensitivity)?;
            if *sensitivity < 0.0 {
                return Err(ProtocolError::OutOfRange {
                    field: "sensitivity",
                    value: *sensitivity,
                });
            }
        }
        Command::MouseScroll { dy } => finite("dy", *dy)?,
        Command::MobileInput { x, y } => {
            unit_interval("x", *x)?;
            unit_interval("y", *y)?;
        }
        Command::SystemStats {
            cpu, mem, battery, ..
        } => {
            percentage("cpu", *cpu)?;
            percentage("mem", *mem)?;
            if let Some(level) = battery {
                percentage("battery", *level)?;
            }
        }
        Command::MobileToPc {
            battery: Some(level),
            ..
        } => percentage("battery", *level)?,
        _ => {}
    }
    Ok(())
}

// ── Field checks ──────────────────────────────────────────────────────────────

fn finite(field: &'static str, value: f64) -> Result<(), ProtocolError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ProtocolError::NonFinite { field })
    }
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), ProtocolError> {
    finite(field, value)?;
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange { field, value })
    }
}

fn percentage(field: &'static str, value: u8) -> Result<(), ProtocolError> {
    if value <= 100 {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange {
            field,
            value: f64::from(value),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
