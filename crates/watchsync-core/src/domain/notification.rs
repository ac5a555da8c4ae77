//! Notification entities shared between the local event feed and the
//! remote notification bridge.
//!
//! The local side identifies a notification by its string `key`; the watch
//! side hands back a numeric id.  Everything here is plain data: the
//! per-package [`NotificationOption`], the [`VibrationProfile`] it maps to,
//! the [`LocalNotificationEvent`] feed, and the [`CloseReason`] carried by
//! the remote `NotificationClosed` signal.

use serde::{Deserialize, Serialize};

/// Per-package user preference for forwarded notifications.
///
/// The integer codes are the ones the preference store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationOption {
    #[default]
    Default,
    NoNotifications,
    Silent,
    NormalVibration,
    StrongVibration,
    RingtoneVibration,
}

impl NotificationOption {
    /// Parses a persisted integer code.  Unknown codes fall back to `Default`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::NoNotifications,
            2 => Self::Silent,
            3 => Self::NormalVibration,
            4 => Self::StrongVibration,
            5 => Self::RingtoneVibration,
            _ => Self::Default,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Default => 0,
            Self::NoNotifications => 1,
            Self::Silent => 2,
            Self::NormalVibration => 3,
            Self::StrongVibration => 4,
            Self::RingtoneVibration => 5,
        }
    }

    /// Vibration profile the watch should use, or `None` when notifications
    /// from this package must not be forwarded at all.
    pub fn vibration(self) -> Option<VibrationProfile> {
        match self {
            Self::NoNotifications => None,
            Self::Silent => Some(VibrationProfile::Silent),
            Self::Default | Self::NormalVibration => Some(VibrationProfile::Normal),
            Self::StrongVibration => Some(VibrationProfile::Strong),
            Self::RingtoneVibration => Some(VibrationProfile::Ringtone),
        }
    }
}

/// Haptic feedback profile understood by the watch's feedback daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VibrationProfile {
    Silent,
    Normal,
    Strong,
    Ringtone,
}

impl VibrationProfile {
    /// Feedback event name sent in the `x-nemo-feedback` hint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Silent => "notif_silent",
            Self::Normal => "notif_normal",
            Self::Strong => "notif_strong",
            Self::Ringtone => "ringtone",
        }
    }
}

/// Content of a notification posted on the phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedNotification {
    /// Stable local identity of the notification.
    pub key: String,
    pub package_name: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_icon: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub body: String,
    /// Platform priority; 0 is the platform default, negative is "low".
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub ongoing: bool,
    #[serde(default)]
    pub local_only: bool,
    #[serde(default)]
    pub group_summary: bool,
}

impl PostedNotification {
    /// Convenience constructor for the fields the bridge actually forwards.
    pub fn new(
        key: impl Into<String>,
        package_name: impl Into<String>,
        summary: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            package_name: package_name.into(),
            app_name: String::new(),
            app_icon: String::new(),
            summary: summary.into(),
            body: body.into(),
            priority: 0,
            ongoing: false,
            local_only: false,
            group_summary: false,
        }
    }
}

/// One event from the local notification listener.
///
/// Serialised as a JSON object tagged by `event`, e.g.
/// `{"event":"removed","key":"0|pkg|1|null|10001"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum LocalNotificationEvent {
    Posted(PostedNotification),
    Removed { key: String },
}

impl LocalNotificationEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Posted(n) => &n.key,
            Self::Removed { key } => key,
        }
    }
}

/// Reason code of the remote `NotificationClosed(id, reason)` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    Expired,
    DismissedByUser,
    ClosedByCall,
    Undefined,
    Unknown(u32),
}

impl CloseReason {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Expired,
            2 => Self::DismissedByUser,
            3 => Self::ClosedByCall,
            4 => Self::Undefined,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Expired => 1,
            Self::DismissedByUser => 2,
            Self::ClosedByCall => 3,
            Self::Undefined => 4,
            Self::Unknown(code) => code,
        }
    }
}

/// Decides which posted notifications are worth mirroring to the watch.
///
/// Group summaries, local-only and low-priority notifications are never
/// forwarded.  Ongoing notifications (media players, downloads) are dropped
/// unless the package is explicitly allowed, e.g. turn-by-turn navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFilter {
    allowed_ongoing: Vec<String>,
}

impl NotificationFilter {
    pub fn new(allowed_ongoing: Vec<String>) -> Self {
        Self { allowed_ongoing }
    }

    pub fn accepts(&self, notification: &PostedNotification) -> bool {
        if notification.group_summary || notification.local_only || notification.priority < 0 {
            return false;
        }
        if notification.ongoing {
            return self
                .allowed_ongoing
                .iter()
                .any(|p| p == &notification.package_name);
        }
        true
    }
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self::new(vec![
            "com.google.android.apps.maps".to_string(),
            "org.thoughtcrime.securesms".to_string(),
        ])
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
