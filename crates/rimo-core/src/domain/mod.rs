//! Domain types shared by every Rimo crate.
//!
//! These are plain values with no behaviour beyond formatting and
//! (de)serialisation: who a device is, what role it declared, which transport
//! it arrived on, and which user owns it.

pub mod device;

pub use device::{ConnectionId, DeviceRole, DeviceSummary, OwnerId, TransportKind};
