//! Domain layer for rimo-host.
//!
//! Pure configuration types with no I/O.  The infrastructure layer fills
//! them from CLI flags and the settings file.

pub mod config;

pub use config::HostConfig;
