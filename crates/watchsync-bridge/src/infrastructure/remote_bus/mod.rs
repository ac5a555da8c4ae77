//! Remote bus transports.
//!
//! `memory` is always available and backs the tests and `--dry-run`.  The
//! zbus adapter is compiled in with the `dbus` feature.

pub mod memory;

#[cfg(feature = "dbus")]
pub mod zbus_bus;
