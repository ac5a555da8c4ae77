//! Domain entities for WatchSync.
//!
//! Pure data and rules with no runtime, I/O, or platform dependencies.  The
//! bridge crate builds its stateful modules on top of these types, and the
//! same types describe the events arriving from the phone side.

/// Connection state, characteristic directions, service descriptors.
pub mod connection;

/// Local notification key ↔ remote id bimap.
pub mod mapping;

/// Media-session snapshot, command availability, track identifiers.
pub mod media;

/// Notification options, vibration profiles, local events, close reasons.
pub mod notification;
