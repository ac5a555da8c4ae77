//! # watchsync-core
//!
//! Shared library for WatchSync containing the domain entities and the
//! remote-bus value model used by the bridge.
//!
//! It has no async runtime, no sockets, and no platform dependencies, so
//! everything here can be unit-tested in isolation.
//!
//! # Architecture overview (for beginners)
//!
//! WatchSync keeps a smartwatch mirrored with a phone: notifications posted
//! on the phone appear on the watch, dismissing them on the watch dismisses
//! them on the phone, and the watch can control whatever media session is
//! playing.  Two kinds of traffic are involved:
//!
//! - **Characteristics** – small one-directional data channels on the
//!   paired device (battery level, time).  See [`domain::connection`].
//!
//! - **The remote object bus** – method calls, signals and properties on
//!   named objects living on the watch.  See [`protocol`].
//!
//! This crate defines the vocabulary for both; `watchsync-bridge` holds the
//! stateful modules that move data between them.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `watchsync_core::ConnectionState` instead of the full module path.
pub use domain::connection::{
    uuids, CharacteristicId, ConnectionState, Direction, ServiceDescriptor, ServiceId,
};
pub use domain::mapping::NotificationIdMap;
pub use domain::media::{
    track_hash, track_object_path, AvailableCommands, MediaItem, PlaybackStatus, PlayerCommand,
    PlayerSnapshot, PlayerState, RepeatMode, NO_TRACK_PATH,
};
pub use domain::notification::{
    CloseReason, LocalNotificationEvent, NotificationFilter, NotificationOption,
    PostedNotification, VibrationProfile,
};
pub use protocol::{BusType, BusValue, MethodCall, Signal, SignalMatch};
