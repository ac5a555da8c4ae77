//! Signal builders for the media-control (MPRIS) surface.

use std::collections::BTreeMap;

use crate::protocol::names::{MPRIS_PATH, MPRIS_PLAYER_INTERFACE, PROPERTIES_INTERFACE};
use crate::protocol::value::{BusValue, Signal};

/// `org.freedesktop.DBus.Properties.PropertiesChanged` for `interface`.
///
/// Only `changed` values are sent; the invalidated list is always empty.
pub fn properties_changed(interface: &str, changed: BTreeMap<String, BusValue>) -> Signal {
    Signal::new(
        MPRIS_PATH,
        PROPERTIES_INTERFACE,
        "PropertiesChanged",
        vec![
            BusValue::from(interface),
            BusValue::Dict(changed),
            BusValue::StrList(Vec::new()),
        ],
    )
}

/// `org.mpris.MediaPlayer2.Player.Seeked(x position)` in microseconds.
pub fn seeked(position_us: i64) -> Signal {
    Signal::new(
        MPRIS_PATH,
        MPRIS_PLAYER_INTERFACE,
        "Seeked",
        vec![BusValue::Int64(position_us)],
    )
}

/// Names of the properties carried by a `PropertiesChanged` signal, if it is
/// one.
pub fn changed_property_names(signal: &Signal) -> Option<Vec<&str>> {
    if signal.interface != PROPERTIES_INTERFACE || signal.member != "PropertiesChanged" {
        return None;
    }
    let dict = signal.args.get(1)?.as_dict()?;
    Some(dict.keys().map(String::as_str).collect())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
