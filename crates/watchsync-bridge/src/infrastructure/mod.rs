//! Infrastructure layer for the bridge.
//!
//! Contains the adapters behind the application-layer capability traits.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `watchsync_core`, but MUST NOT be imported by the `application` layer
//! outside of tests.
//!
//! # Sub-modules
//!
//! - **`remote_bus`** – `RemoteBus` implementations: the in-memory loopback
//!   bus and, with the `dbus` feature, the zbus adapter.
//!
//! - **`transport`** – `DeviceTransport` implementations for the paired
//!   device.  The BLE stack itself is outside this crate.
//!
//! - **`storage`** – TOML configuration and the preference store backed by
//!   it.
//!
//! - **`local_events`** – Reads the phone's notification events as JSON
//!   lines and writes dismiss/refresh requests back.
//!
//! - **`media`** – Media session adapters.
//!
//! - **`ringer`** – `RingerControl` stand-in for the phone's audio service.

pub mod local_events;
pub mod media;
pub mod remote_bus;
pub mod ringer;
pub mod storage;
pub mod transport;
