//! Well-known bus names, object paths, and interfaces.

/// Bus name of the watch's notification daemon.
pub const NOTIFICATIONS_SERVICE: &str = "org.freedesktop.Notifications";
pub const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";
pub const NOTIFICATIONS_INTERFACE: &str = "org.freedesktop.Notifications";

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Object path every MPRIS player exports.
pub const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
pub const MPRIS_ROOT_INTERFACE: &str = "org.mpris.MediaPlayer2";
pub const MPRIS_PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

/// Well-known name the bridge claims for its media player by default.
pub const DEFAULT_MPRIS_BUS_NAME: &str = "org.mpris.MediaPlayer2.WatchSync";

/// Address of the watch's bus as seen through the tunnelled link.
pub const DEFAULT_BUS_ADDRESS: &str = "tcp:host=127.0.0.1,bind=*,port=55556,family=ipv4";
