//! Local media session capability.
//!
//! A media session is whatever app is currently playing on the phone.  The
//! platform side (a session manager, or the fake in tests) implements
//! [`MediaController`]; the media bridge only ever sees this trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use watchsync_core::{PlayerCommand, PlayerSnapshot, RepeatMode};

/// Change notifications from a bound session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    TrackChanged,
    PlayStateChanged,
    /// Playback jumped, e.g. after a seek.
    PositionDiscontinuity { position_ms: i64 },
    VolumeChanged,
    RepeatModeChanged,
    ShuffleChanged,
    SpeedChanged,
    AvailableCommandsChanged,
}

/// A request forwarded from the watch to the local session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerRequest {
    Play,
    Pause,
    Stop,
    SeekToNext,
    SeekToPrevious,
    SeekTo { position_ms: i64 },
    SetRepeatMode(RepeatMode),
    SetShuffle(bool),
    SetSpeed(f64),
    SetVolume(f64),
}

impl PlayerRequest {
    /// The capability the session must advertise for this request to be
    /// forwarded.
    pub fn required_command(&self) -> PlayerCommand {
        match self {
            Self::Play | Self::Pause => PlayerCommand::PlayPause,
            Self::Stop => PlayerCommand::Stop,
            Self::SeekToNext => PlayerCommand::SeekToNext,
            Self::SeekToPrevious => PlayerCommand::SeekToPrevious,
            Self::SeekTo { .. } => PlayerCommand::SeekInCurrentItem,
            Self::SetRepeatMode(_) => PlayerCommand::SetRepeatMode,
            Self::SetShuffle(_) => PlayerCommand::SetShuffleMode,
            Self::SetSpeed(_) => PlayerCommand::SetSpeed,
            Self::SetVolume(_) => PlayerCommand::SetVolume,
        }
    }
}

/// Handle to one local media session.
#[async_trait]
pub trait MediaController: Send + Sync {
    /// Package (application id) owning the session.
    fn package_name(&self) -> &str;

    /// Subscribes to change events.  Events published before the call are
    /// not replayed.
    fn events(&self) -> broadcast::Receiver<SessionEvent>;

    /// Reads the full session state.  May be slow; callers bound it with a
    /// timeout.
    async fn snapshot(&self) -> PlayerSnapshot;

    /// Forwards a request to the session.
    async fn execute(&self, request: PlayerRequest);
}

/// Shared handle to a session, as published on the event hub.
pub type SessionHandle = Arc<dyn MediaController>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_command_maps_play_and_pause_to_play_pause() {
        assert_eq!(PlayerRequest::Play.required_command(), PlayerCommand::PlayPause);
        assert_eq!(PlayerRequest::Pause.required_command(), PlayerCommand::PlayPause);
        assert_eq!(
            PlayerRequest::SeekTo { position_ms: 10 }.required_command(),
            PlayerCommand::SeekInCurrentItem
        );
        assert_eq!(
            PlayerRequest::SetShuffle(true).required_command(),
            PlayerCommand::SetShuffleMode
        );
    }
}
