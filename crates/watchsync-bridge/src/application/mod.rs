//! Application layer for the bridge.
//!
//! # What lives here?
//!
//! - **`device`** – The service registry for one paired watch.  Routes
//!   characteristic traffic and fans connection changes out to modules as
//!   `sync`/`unsync` calls.
//!
//! - **`connection_channel`** – The serialized remote-bus session.  Every
//!   bus operation in the process runs as a unit of work on its single
//!   worker.
//!
//! - **`event_hub`** – Shared watch/broadcast channels carrying connection
//!   state, battery level, local notification events and the active media
//!   sessions.
//!
//! - **`notification_bridge`** – Forwards phone notifications to the watch
//!   and replays watch-side dismissals locally.
//!
//! - **`media_bridge`** / **`media_properties`** / **`media_session`** –
//!   Exports the bound media session as an MPRIS player on the watch's bus.
//!
//! - **`remote_bus_link`**, **`battery`**, **`time_sync`**, **`silent_mode`**
//!   – Small modules bound to the device lifecycle.
//!
//! - **`remote_bus`**, **`preferences`** – Capability traits implemented in
//!   `infrastructure`.
//!
//! **Dependency rule**: nothing here imports `infrastructure` outside of
//! tests.

pub mod battery;
pub mod connection_channel;
pub mod device;
pub mod event_hub;
pub mod media_bridge;
pub mod media_properties;
pub mod media_session;
pub mod notification_bridge;
pub mod preferences;
pub mod remote_bus;
pub mod remote_bus_link;
pub mod silent_mode;
pub mod time_sync;
