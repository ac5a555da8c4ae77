//! Static property table of the exported media-control object.
//!
//! Every property the watch can read is declared once in [`PROPERTIES`]
//! with its interface, type tag, getter, and optional setter.  The media
//! bridge uses the table for `Get`, `GetAll`, `Set` and to build
//! `PropertiesChanged` broadcasts, so there is exactly one place that says
//! what a property means.
//!
//! Getters are pure functions of a [`PropertyContext`].  With no session
//! bound (`snapshot == None`) every getter returns its safe default.
//! Setters only translate a remote value into a [`PlayerRequest`]; the
//! bridge checks command availability before forwarding it.

use std::collections::BTreeMap;

use watchsync_core::protocol::names::{MPRIS_PLAYER_INTERFACE, MPRIS_ROOT_INTERFACE};
use watchsync_core::{
    BusType, BusValue, PlaybackStatus, PlayerCommand, PlayerSnapshot, RepeatMode, NO_TRACK_PATH,
};

use crate::application::media_session::PlayerRequest;

pub const MINIMUM_RATE: f64 = 0.25;
pub const MAXIMUM_RATE: f64 = 2.0;

/// Inputs every getter reads from.
#[derive(Debug, Clone, Copy)]
pub struct PropertyContext<'a> {
    /// State of the bound session, or `None` when nothing is bound (or the
    /// session did not answer in time).
    pub snapshot: Option<&'a PlayerSnapshot>,
    /// Value reported as the root `Identity`.
    pub identity: &'a str,
}

pub type Getter = fn(&PropertyContext<'_>) -> BusValue;
pub type Setter = fn(&BusValue) -> Option<PlayerRequest>;

/// One exported property.
pub struct PropertyDef {
    pub name: &'static str,
    pub interface: &'static str,
    pub ty: BusType,
    pub get: Getter,
    /// `None` for read-only properties.
    pub set: Option<Setter>,
}

impl PropertyDef {
    pub fn is_writable(&self) -> bool {
        self.set.is_some()
    }
}

/// Properties broadcast together when a session's command set changes.
pub const CAPABILITY_PROPERTIES: [&str; 6] = [
    "CanGoNext",
    "CanGoPrevious",
    "CanPlay",
    "CanPause",
    "CanSeek",
    "CanControl",
];

macro_rules! read_only {
    ($name:literal, $iface:expr, $ty:expr, $get:expr) => {
        PropertyDef {
            name: $name,
            interface: $iface,
            ty: $ty,
            get: $get,
            set: None,
        }
    };
}

pub static PROPERTIES: &[PropertyDef] = &[
    // ── org.mpris.MediaPlayer2 ────────────────────────────────────────────────
    read_only!("CanQuit", MPRIS_ROOT_INTERFACE, BusType::Bool, always_false),
    read_only!("Fullscreen", MPRIS_ROOT_INTERFACE, BusType::Bool, always_false),
    read_only!("CanSetFullscreen", MPRIS_ROOT_INTERFACE, BusType::Bool, always_false),
    read_only!("CanRaise", MPRIS_ROOT_INTERFACE, BusType::Bool, always_false),
    read_only!("HasTrackList", MPRIS_ROOT_INTERFACE, BusType::Bool, always_false),
    read_only!("Identity", MPRIS_ROOT_INTERFACE, BusType::Str, identity),
    read_only!("SupportedUriSchemes", MPRIS_ROOT_INTERFACE, BusType::StrList, empty_list),
    read_only!("SupportedMimeTypes", MPRIS_ROOT_INTERFACE, BusType::StrList, empty_list),
    // ── org.mpris.MediaPlayer2.Player ─────────────────────────────────────────
    read_only!("PlaybackStatus", MPRIS_PLAYER_INTERFACE, BusType::Str, playback_status),
    PropertyDef {
        name: "LoopStatus",
        interface: MPRIS_PLAYER_INTERFACE,
        ty: BusType::Str,
        get: loop_status,
        set: Some(set_loop_status),
    },
    PropertyDef {
        name: "Rate",
        interface: MPRIS_PLAYER_INTERFACE,
        ty: BusType::Double,
        get: rate,
        set: Some(set_rate),
    },
    PropertyDef {
        name: "Shuffle",
        interface: MPRIS_PLAYER_INTERFACE,
        ty: BusType::Bool,
        get: shuffle,
        set: Some(set_shuffle),
    },
    read_only!("Metadata", MPRIS_PLAYER_INTERFACE, BusType::Dict, metadata),
    PropertyDef {
        name: "Volume",
        interface: MPRIS_PLAYER_INTERFACE,
        ty: BusType::Double,
        get: volume,
        set: Some(set_volume),
    },
    read_only!("Position", MPRIS_PLAYER_INTERFACE, BusType::Int64, position),
    read_only!("MinimumRate", MPRIS_PLAYER_INTERFACE, BusType::Double, minimum_rate),
    read_only!("MaximumRate", MPRIS_PLAYER_INTERFACE, BusType::Double, maximum_rate),
    read_only!("CanGoNext", MPRIS_PLAYER_INTERFACE, BusType::Bool, can_go_next),
    read_only!("CanGoPrevious", MPRIS_PLAYER_INTERFACE, BusType::Bool, can_go_previous),
    read_only!("CanPlay", MPRIS_PLAYER_INTERFACE, BusType::Bool, can_play_pause),
    read_only!("CanPause", MPRIS_PLAYER_INTERFACE, BusType::Bool, can_play_pause),
    read_only!("CanSeek", MPRIS_PLAYER_INTERFACE, BusType::Bool, can_seek),
    read_only!("CanControl", MPRIS_PLAYER_INTERFACE, BusType::Bool, always_true),
];

/// Looks up one property.
pub fn find(interface: &str, name: &str) -> Option<&'static PropertyDef> {
    PROPERTIES
        .iter()
        .find(|p| p.interface == interface && p.name == name)
}

/// All properties of `interface`, in declaration order.
pub fn for_interface(interface: &str) -> impl Iterator<Item = &'static PropertyDef> + '_ {
    PROPERTIES.iter().filter(move |p| p.interface == interface)
}

/// Whether `interface` is one the exported object implements.
pub fn is_known_interface(interface: &str) -> bool {
    interface == MPRIS_ROOT_INTERFACE || interface == MPRIS_PLAYER_INTERFACE
}

/// Evaluates every property of `interface`.
pub fn get_all(interface: &str, ctx: &PropertyContext<'_>) -> BTreeMap<String, BusValue> {
    for_interface(interface)
        .map(|p| (p.name.to_string(), (p.get)(ctx)))
        .collect()
}

/// Evaluates the named properties of `interface`; unknown names are skipped.
pub fn get_named(
    interface: &str,
    names: &[&str],
    ctx: &PropertyContext<'_>,
) -> BTreeMap<String, BusValue> {
    names
        .iter()
        .filter_map(|name| find(interface, name))
        .map(|p| (p.name.to_string(), (p.get)(ctx)))
        .collect()
}

// ── Getters ───────────────────────────────────────────────────────────────────

fn always_false(_: &PropertyContext<'_>) -> BusValue {
    BusValue::Bool(false)
}

fn always_true(_: &PropertyContext<'_>) -> BusValue {
    BusValue::Bool(true)
}

fn identity(ctx: &PropertyContext<'_>) -> BusValue {
    BusValue::from(ctx.identity)
}

fn empty_list(_: &PropertyContext<'_>) -> BusValue {
    BusValue::StrList(Vec::new())
}

fn playback_status(ctx: &PropertyContext<'_>) -> BusValue {
    let status = ctx
        .snapshot
        .map_or(PlaybackStatus::Stopped, PlayerSnapshot::playback_status);
    BusValue::from(status.as_str())
}

fn loop_status(ctx: &PropertyContext<'_>) -> BusValue {
    let mode = ctx.snapshot.map_or(RepeatMode::Off, |s| s.repeat_mode);
    BusValue::from(mode.as_loop_status())
}

fn rate(ctx: &PropertyContext<'_>) -> BusValue {
    BusValue::Double(ctx.snapshot.map_or(1.0, |s| s.speed))
}

fn shuffle(ctx: &PropertyContext<'_>) -> BusValue {
    BusValue::Bool(ctx.snapshot.is_some_and(|s| s.shuffle))
}

fn volume(ctx: &PropertyContext<'_>) -> BusValue {
    BusValue::Double(ctx.snapshot.map_or(0.0, |s| s.volume))
}

fn position(ctx: &PropertyContext<'_>) -> BusValue {
    let position_us = ctx
        .snapshot
        .filter(|s| s.can(PlayerCommand::GetCurrentMediaItem))
        .map_or(0, |s| s.position_ms.saturating_mul(1000));
    BusValue::Int64(position_us)
}

fn minimum_rate(_: &PropertyContext<'_>) -> BusValue {
    BusValue::Double(MINIMUM_RATE)
}

fn maximum_rate(_: &PropertyContext<'_>) -> BusValue {
    BusValue::Double(MAXIMUM_RATE)
}

fn can_go_next(ctx: &PropertyContext<'_>) -> BusValue {
    BusValue::Bool(
        ctx.snapshot
            .is_some_and(|s| s.can(PlayerCommand::SeekToNext) && s.has_next),
    )
}

fn can_go_previous(ctx: &PropertyContext<'_>) -> BusValue {
    BusValue::Bool(
        ctx.snapshot
            .is_some_and(|s| s.can(PlayerCommand::SeekToPrevious) && s.has_previous),
    )
}

fn can_play_pause(ctx: &PropertyContext<'_>) -> BusValue {
    BusValue::Bool(ctx.snapshot.is_some_and(|s| s.can(PlayerCommand::PlayPause)))
}

fn can_seek(ctx: &PropertyContext<'_>) -> BusValue {
    BusValue::Bool(ctx.snapshot.is_some_and(|s| {
        s.can(PlayerCommand::SeekInCurrentItem) && s.current_item_seekable
    }))
}

/// `a{sv}` track metadata.  Without a current item only the "no track"
/// identifier is reported.
fn metadata(ctx: &PropertyContext<'_>) -> BusValue {
    let mut map = BTreeMap::new();
    let current = ctx
        .snapshot
        .and_then(|s| s.current_item.as_ref().map(|item| (s, item)));
    let Some((snapshot, item)) = current else {
        map.insert(
            "mpris:trackid".to_string(),
            BusValue::variant(BusValue::ObjectPath(NO_TRACK_PATH.to_string())),
        );
        return BusValue::Dict(map);
    };

    if let Some(path) = snapshot.track_path() {
        map.insert(
            "mpris:trackid".to_string(),
            BusValue::variant(BusValue::ObjectPath(path)),
        );
    }
    if let Some(duration_ms) = item.duration_ms {
        map.insert(
            "mpris:length".to_string(),
            BusValue::variant(BusValue::Int64(duration_ms.saturating_mul(1000))),
        );
    }
    if !item.title.is_empty() {
        map.insert(
            "xesam:title".to_string(),
            BusValue::variant(BusValue::from(item.title.as_str())),
        );
    }
    if let Some(artist) = &item.artist {
        map.insert(
            "xesam:artist".to_string(),
            BusValue::variant(BusValue::StrList(vec![artist.clone()])),
        );
    }
    if let Some(album) = &item.album {
        map.insert(
            "xesam:album".to_string(),
            BusValue::variant(BusValue::from(album.as_str())),
        );
    }
    BusValue::Dict(map)
}

// ── Setters ───────────────────────────────────────────────────────────────────

fn set_loop_status(value: &BusValue) -> Option<PlayerRequest> {
    value
        .as_str()
        .and_then(RepeatMode::from_loop_status)
        .map(PlayerRequest::SetRepeatMode)
}

fn set_rate(value: &BusValue) -> Option<PlayerRequest> {
    // A rate of 0 is not a pause request here; out-of-range rates are ignored.
    value
        .as_f64()
        .filter(|rate| (MINIMUM_RATE..=MAXIMUM_RATE).contains(rate))
        .map(PlayerRequest::SetSpeed)
}

fn set_shuffle(value: &BusValue) -> Option<PlayerRequest> {
    value.as_bool().map(PlayerRequest::SetShuffle)
}

fn set_volume(value: &BusValue) -> Option<PlayerRequest> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .map(|v| PlayerRequest::SetVolume(v.clamp(0.0, 1.0)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use watchsync_core::{AvailableCommands, MediaItem, PlayerState};

    use super::*;

    fn no_session() -> PropertyContext<'static> {
        PropertyContext {
            snapshot: None,
            identity: "Android",
        }
    }

    fn playing() -> PlayerSnapshot {
        let mut item = MediaItem::new("id-1", "Song");
        item.artist = Some("Band".into());
        item.duration_ms = Some(180_000);
        PlayerSnapshot {
            is_playing: true,
            state: PlayerState::Ready,
            position_ms: 1_500,
            current_item: Some(item),
            has_next: true,
            current_item_seekable: true,
            available: AvailableCommands::all(),
            ..PlayerSnapshot::idle("org.example.player")
        }
    }

    fn get(name: &str, ctx: &PropertyContext<'_>) -> BusValue {
        let def = find(MPRIS_PLAYER_INTERFACE, name)
            .or_else(|| find(MPRIS_ROOT_INTERFACE, name))
            .unwrap();
        (def.get)(ctx)
    }

    #[test]
    fn test_every_getter_has_a_default_without_session() {
        // Arrange
        let ctx = no_session();

        // Act / Assert
        for def in PROPERTIES {
            let value = (def.get)(&ctx);
            assert_eq!(value.bus_type(), def.ty, "type of {}", def.name);
        }
        assert_eq!(get("PlaybackStatus", &ctx), BusValue::from("Stopped"));
        assert_eq!(get("Rate", &ctx), BusValue::Double(1.0));
        assert_eq!(get("Volume", &ctx), BusValue::Double(0.0));
        assert_eq!(get("Position", &ctx), BusValue::Int64(0));
        assert_eq!(get("CanPlay", &ctx), BusValue::Bool(false));
        assert_eq!(get("CanControl", &ctx), BusValue::Bool(true));
        assert_eq!(get("Identity", &ctx), BusValue::from("Android"));
    }

    #[test]
    fn test_metadata_without_item_is_no_track() {
        let value = get("Metadata", &no_session());

        let dict = value.as_dict().unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict["mpris:trackid"].as_str(), Some(NO_TRACK_PATH));
    }

    #[test]
    fn test_metadata_of_current_item() {
        // Arrange
        let snapshot = playing();
        let ctx = PropertyContext {
            snapshot: Some(&snapshot),
            identity: "Android",
        };

        // Act
        let value = get("Metadata", &ctx);

        // Assert
        let dict = value.as_dict().unwrap();
        assert!(dict["mpris:trackid"]
            .as_str()
            .unwrap()
            .starts_with("/org/example/player/"));
        assert_eq!(dict["mpris:length"].as_i64(), Some(180_000_000));
        assert_eq!(dict["xesam:title"].as_str(), Some("Song"));
        assert_eq!(
            dict["xesam:artist"].unwrap_variant(),
            &BusValue::StrList(vec!["Band".into()])
        );
        assert!(!dict.contains_key("xesam:album"));
    }

    #[test]
    fn test_capabilities_consult_available_commands() {
        // Arrange
        let mut snapshot = playing();
        snapshot.available = AvailableCommands::all()
            .without(PlayerCommand::SeekToNext)
            .without(PlayerCommand::GetCurrentMediaItem);
        let ctx = PropertyContext {
            snapshot: Some(&snapshot),
            identity: "Android",
        };

        // Act / Assert
        assert_eq!(get("CanGoNext", &ctx), BusValue::Bool(false));
        assert_eq!(get("CanSeek", &ctx), BusValue::Bool(true));
        assert_eq!(get("Position", &ctx), BusValue::Int64(0));
        assert_eq!(get("PlaybackStatus", &ctx), BusValue::from("Playing"));
    }

    #[test]
    fn test_position_is_reported_in_microseconds() {
        let snapshot = playing();
        let ctx = PropertyContext {
            snapshot: Some(&snapshot),
            identity: "Android",
        };

        assert_eq!(get("Position", &ctx), BusValue::Int64(1_500_000));
    }

    #[test]
    fn test_setters_translate_values_into_requests() {
        let loop_status = find(MPRIS_PLAYER_INTERFACE, "LoopStatus").unwrap();
        let volume = find(MPRIS_PLAYER_INTERFACE, "Volume").unwrap();
        let rate = find(MPRIS_PLAYER_INTERFACE, "Rate").unwrap();

        assert_eq!(
            (loop_status.set.unwrap())(&BusValue::from("Playlist")),
            Some(PlayerRequest::SetRepeatMode(RepeatMode::All))
        );
        assert_eq!((loop_status.set.unwrap())(&BusValue::from("Sometimes")), None);
        assert_eq!(
            (volume.set.unwrap())(&BusValue::Double(1.7)),
            Some(PlayerRequest::SetVolume(1.0))
        );
        assert_eq!((rate.set.unwrap())(&BusValue::Double(0.0)), None);
        assert_eq!(
            (rate.set.unwrap())(&BusValue::variant(BusValue::Double(1.5))),
            Some(PlayerRequest::SetSpeed(1.5))
        );
    }

    #[test]
    fn test_get_all_covers_interface_and_writability() {
        let all = get_all(MPRIS_PLAYER_INTERFACE, &no_session());

        assert_eq!(all.len(), for_interface(MPRIS_PLAYER_INTERFACE).count());
        assert!(find(MPRIS_PLAYER_INTERFACE, "Shuffle").unwrap().is_writable());
        assert!(!find(MPRIS_PLAYER_INTERFACE, "Metadata").unwrap().is_writable());
        assert_eq!(get_all(MPRIS_ROOT_INTERFACE, &no_session()).len(), 8);
    }

    #[test]
    fn test_get_named_skips_unknown_names() {
        let values = get_named(
            MPRIS_PLAYER_INTERFACE,
            &["Volume", "Bogus"],
            &no_session(),
        );

        assert_eq!(values.len(), 1);
        assert!(values.contains_key("Volume"));
    }
}
