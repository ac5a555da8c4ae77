//! Shared event-and-state hub.
//!
//! Every module receives an `Arc<EventHub>` in its constructor instead of
//! reaching for process-wide singletons.  Events are split into a small
//! closed set of categories, each with its own typed channel:
//!
//! | Category      | Channel     | Carries                                   |
//! |---------------|-------------|-------------------------------------------|
//! | connection    | `watch`     | current [`ConnectionState`]               |
//! | connection    | `broadcast` | [`ConnectionEvent`] transitions, battery  |
//! | battery       | `watch`     | last known percentage                     |
//! | notifications | `broadcast` | [`NotificationEvent`]                     |
//! | media         | `watch`     | active media sessions, most recent first  |
//! | time          | `broadcast` | [`TimeSyncReason`] re-sync requests       |
//!
//! Publishing never blocks and never fails when nobody is listening.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use watchsync_core::{ConnectionState, LocalNotificationEvent};

use crate::application::media_session::SessionHandle;

/// Buffered events per broadcast subscriber before it starts lagging.
const BROADCAST_CAPACITY: usize = 256;

/// Device-level connectivity events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    BatteryLevel(u8),
}

/// Notification traffic between the local listener and the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// A notification was posted or removed on the phone.
    Local(LocalNotificationEvent),
    /// The watch user dismissed `key`; the local listener should cancel it.
    DismissRequested { key: String },
    /// The bridge (re)synced; the local listener should replay what is active.
    RefreshRequested,
}

/// Why the phone's clock should be pushed to the watch again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeSyncReason {
    /// The phone's clock was set.
    ClockChanged,
    /// The phone moved to another time zone (or DST started or ended).
    TimeZoneChanged,
    /// Explicit request, e.g. from a settings screen.
    Requested,
}

/// The active media sessions as last reported by the platform.
#[derive(Clone, Default)]
pub struct ActiveSessions(pub Vec<SessionHandle>);

impl fmt::Debug for ActiveSessions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|s| s.package_name().to_string()))
            .finish()
    }
}

/// Reference-counted hub shared by the device registry and every module.
pub struct EventHub {
    connection_state: watch::Sender<ConnectionState>,
    battery: watch::Sender<Option<u8>>,
    media_sessions: watch::Sender<ActiveSessions>,
    connection_events: broadcast::Sender<ConnectionEvent>,
    notifications: broadcast::Sender<NotificationEvent>,
    time_sync: broadcast::Sender<TimeSyncReason>,
}

impl EventHub {
    pub fn new() -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (battery, _) = watch::channel(None);
        let (media_sessions, _) = watch::channel(ActiveSessions::default());
        let (connection_events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (notifications, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (time_sync, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            connection_state,
            battery,
            media_sessions,
            connection_events,
            notifications,
            time_sync,
        }
    }

    // ── Connection ────────────────────────────────────────────────────────────

    pub fn publish_connection_state(&self, state: ConnectionState) {
        self.connection_state.send_replace(state);
        let _ = self.connection_events.send(ConnectionEvent::StateChanged(state));
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.borrow()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection_events.subscribe()
    }

    // ── Battery ───────────────────────────────────────────────────────────────

    pub fn publish_battery_level(&self, level: Option<u8>) {
        self.battery.send_replace(level);
        if let Some(level) = level {
            let _ = self.connection_events.send(ConnectionEvent::BatteryLevel(level));
        }
    }

    pub fn battery_level(&self) -> Option<u8> {
        *self.battery.borrow()
    }

    // ── Notifications ─────────────────────────────────────────────────────────

    pub fn publish_notification(&self, event: NotificationEvent) {
        let _ = self.notifications.send(event);
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notifications.subscribe()
    }

    // ── Time ──────────────────────────────────────────────────────────────────

    pub fn request_time_sync(&self, reason: TimeSyncReason) {
        let _ = self.time_sync.send(reason);
    }

    pub fn subscribe_time_sync(&self) -> broadcast::Receiver<TimeSyncReason> {
        self.time_sync.subscribe()
    }

    // ── Media ─────────────────────────────────────────────────────────────────

    /// Replaces the active session list.  The first entry is the one the
    /// media bridge mirrors.
    pub fn publish_media_sessions(&self, sessions: Vec<SessionHandle>) {
        self.media_sessions.send_replace(ActiveSessions(sessions));
    }

    pub fn watch_media_sessions(&self) -> watch::Receiver<ActiveSessions> {
        self.media_sessions.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_does_not_fail() {
        let hub = EventHub::new();
        hub.publish_connection_state(ConnectionState::Connected);
        hub.publish_notification(NotificationEvent::RefreshRequested);
        hub.publish_battery_level(Some(50));

        assert_eq!(hub.connection_state(), ConnectionState::Connected);
        assert_eq!(hub.battery_level(), Some(50));
    }

    #[tokio::test]
    async fn test_notification_subscribers_receive_events_in_order() {
        // Arrange
        let hub = EventHub::new();
        let mut rx = hub.subscribe_notifications();

        // Act
        hub.publish_notification(NotificationEvent::RefreshRequested);
        hub.publish_notification(NotificationEvent::DismissRequested { key: "a1".into() });

        // Assert
        assert_eq!(rx.recv().await.unwrap(), NotificationEvent::RefreshRequested);
        assert_eq!(
            rx.recv().await.unwrap(),
            NotificationEvent::DismissRequested { key: "a1".into() }
        );
    }

    #[tokio::test]
    async fn test_connection_events_include_battery_updates() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe_connection_events();

        hub.publish_connection_state(ConnectionState::Connecting);
        hub.publish_battery_level(Some(80));
        hub.publish_battery_level(None);

        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        );
        assert_eq!(rx.recv().await.unwrap(), ConnectionEvent::BatteryLevel(80));
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.battery_level(), None);
    }

    #[tokio::test]
    async fn test_time_sync_requests_reach_subscribers() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe_time_sync();

        hub.request_time_sync(TimeSyncReason::TimeZoneChanged);

        assert_eq!(rx.recv().await.unwrap(), TimeSyncReason::TimeZoneChanged);
    }

    #[test]
    fn test_media_sessions_start_empty() {
        let hub = EventHub::new();
        assert!(hub.watch_media_sessions().borrow().0.is_empty());
    }

    #[test]
    fn test_connection_watch_wakes_only_on_change() {
        // Arrange
        let hub = EventHub::new();
        let mut states = hub.watch_connection_state();
        let mut changed = tokio_test::task::spawn(states.changed());

        // Act / Assert
        tokio_test::assert_pending!(changed.poll());
        hub.publish_connection_state(ConnectionState::Connected);
        assert!(changed.is_woken());
        assert!(tokio_test::assert_ready!(changed.poll()).is_ok());
    }
}
