//! Media-session entities mirrored onto the watch's media-control surface.
//!
//! A native media session is described by a [`PlayerSnapshot`]: one
//! consistent read of everything the remote properties are derived from.
//! Whether a given control may be invoked right now is a separate question
//! answered by [`AvailableCommands`]; the bridge consults it before reporting
//! a capability or acting on a remote command.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Object path reported as `mpris:trackid` when nothing is loaded.
pub const NO_TRACK_PATH: &str = "/org/mpris/MediaPlayer2/TrackList/NoTrack";

/// Remote-facing playback status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
        }
    }
}

/// Native player lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlayerState {
    #[default]
    Idle,
    Buffering,
    Ready,
    Ended,
}

/// Native repeat mode.  Exposed remotely as the `LoopStatus` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    pub fn as_loop_status(self) -> &'static str {
        match self {
            Self::Off => "None",
            Self::One => "Track",
            Self::All => "Playlist",
        }
    }

    pub fn from_loop_status(status: &str) -> Option<Self> {
        match status {
            "None" => Some(Self::Off),
            "Track" => Some(Self::One),
            "Playlist" => Some(Self::All),
            _ => None,
        }
    }
}

/// Controls a native session may advertise as currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerCommand {
    PlayPause,
    Stop,
    SeekToNext,
    SeekToPrevious,
    SeekInCurrentItem,
    SetRepeatMode,
    SetShuffleMode,
    SetSpeed,
    SetVolume,
    GetCurrentMediaItem,
}

impl PlayerCommand {
    pub const ALL: [PlayerCommand; 10] = [
        Self::PlayPause,
        Self::Stop,
        Self::SeekToNext,
        Self::SeekToPrevious,
        Self::SeekInCurrentItem,
        Self::SetRepeatMode,
        Self::SetShuffleMode,
        Self::SetSpeed,
        Self::SetVolume,
        Self::GetCurrentMediaItem,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Bitmask of available [`PlayerCommand`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AvailableCommands(u16);

impl AvailableCommands {
    pub const NONE: Self = Self(0);

    pub fn all() -> Self {
        Self::from_commands(&PlayerCommand::ALL)
    }

    pub fn from_commands(commands: &[PlayerCommand]) -> Self {
        Self(commands.iter().fold(0, |acc, c| acc | c.bit()))
    }

    pub fn contains(self, command: PlayerCommand) -> bool {
        self.0 & command.bit() != 0
    }

    pub fn with(self, command: PlayerCommand) -> Self {
        Self(self.0 | command.bit())
    }

    pub fn without(self, command: PlayerCommand) -> Self {
        Self(self.0 & !command.bit())
    }
}

/// The item currently loaded in a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaItem {
    /// Native media identifier, may be empty.
    pub media_id: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Duration in milliseconds, when known.
    pub duration_ms: Option<i64>,
}

impl MediaItem {
    pub fn new(media_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            media_id: media_id.into(),
            title: title.into(),
            ..Self::default()
        }
    }
}

/// One consistent read of a bound session's state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub package_name: String,
    pub is_playing: bool,
    pub play_when_ready: bool,
    pub state: PlayerState,
    pub repeat_mode: RepeatMode,
    pub shuffle: bool,
    pub speed: f64,
    pub volume: f64,
    pub position_ms: i64,
    pub current_item: Option<MediaItem>,
    pub has_next: bool,
    pub has_previous: bool,
    pub current_item_seekable: bool,
    pub available: AvailableCommands,
}

impl PlayerSnapshot {
    /// An idle session with nothing loaded.
    pub fn idle(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            is_playing: false,
            play_when_ready: false,
            state: PlayerState::Idle,
            repeat_mode: RepeatMode::Off,
            shuffle: false,
            speed: 1.0,
            volume: 0.0,
            position_ms: 0,
            current_item: None,
            has_next: false,
            has_previous: false,
            current_item_seekable: false,
            available: AvailableCommands::NONE,
        }
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        if self.is_playing {
            PlaybackStatus::Playing
        } else if self.state == PlayerState::Ready && !self.play_when_ready {
            PlaybackStatus::Paused
        } else {
            PlaybackStatus::Stopped
        }
    }

    pub fn can(&self, command: PlayerCommand) -> bool {
        self.available.contains(command)
    }

    /// Remote track identifier of the current item, if any.
    pub fn track_path(&self) -> Option<String> {
        self.current_item
            .as_ref()
            .map(|item| track_object_path(&self.package_name, item))
    }
}

/// Order-sensitive hash of a track's title and native media id.
///
/// The same `(title, media_id)` pair always hashes to the same value within
/// a build; swapping the two fields yields a different value.
pub fn track_hash(title: &str, media_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    title.hash(&mut hasher);
    media_id.hash(&mut hasher);
    hasher.finish()
}

/// Builds the `mpris:trackid` object path for `item` played by `package`.
///
/// `org.example.player` playing a track becomes
/// `/org/example/player/<16 hex digits>`.
pub fn track_object_path(package: &str, item: &MediaItem) -> String {
    let mut path = String::with_capacity(package.len() + 18);
    for segment in package.split('.').filter(|s| !s.is_empty()) {
        path.push('/');
        path.extend(segment.chars().map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        }));
    }
    path.push('/');
    path.push_str(&format!("{:016x}", track_hash(&item.title, &item.media_id)));
    path
}

// ── Tests ─────────────────────────────────────────────────────────────────────
