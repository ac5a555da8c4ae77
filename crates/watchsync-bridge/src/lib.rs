//! watchsync-bridge library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the bridge do? (for beginners)
//!
//! The bridge runs on the phone side of a watch pairing and keeps the watch
//! in step with the phone:
//!
//! 1. A notification posted on the phone is sent to the watch's
//!    notification service with `Notify`; removing it on the phone closes it
//!    on the watch.
//! 2. Dismissing it on the watch asks the phone to cancel it, without the
//!    cancellation bouncing back as a second close.
//! 3. Whatever media session is active on the phone is exported on the
//!    watch's bus as an MPRIS player, so the watch can show the track and
//!    send play/pause/seek back.
//! 4. Battery level flows in and the current time flows out over small
//!    device characteristics.
//!
//! Every remote-bus operation runs on one serialized connection worker
//! (see [`application::connection_channel`]); modules learn about the watch
//! connecting and disconnecting only through the device registry
//! (see [`application::device`]).

/// Application layer: modules, the device registry, and capability traits.
pub mod application;

/// Infrastructure layer: bus, transport, storage and local-event adapters.
pub mod infrastructure;

/// Wiring shared by the binary and the integration tests.
pub mod runtime;
