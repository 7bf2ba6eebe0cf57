//! Rimo command protocol.
//!
//! - [`commands`] – the closed [`Command`](commands::Command) sum type.
//! - [`codec`] – JSON text encoding plus boundary validation.
//! - [`handshake`] – the first frame exchanged on the direct channel.
//! - [`frame`] – screen-frame blob encoding.

pub mod codec;
pub mod commands;
pub mod frame;
pub mod handshake;
