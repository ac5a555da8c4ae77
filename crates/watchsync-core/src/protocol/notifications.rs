//! Typed helpers for the watch's notification service.
//!
//! ```text
//! Notify(s app_name, u replaces_id, s app_icon, s summary, s body,
//!        as actions, a{sv} hints, i expire_timeout) -> u id
//! CloseNotification(u id)
//! signal NotificationClosed(u id, u reason)
//! ```

use std::collections::BTreeMap;

use crate::domain::notification::{CloseReason, VibrationProfile};
use crate::protocol::names::{NOTIFICATIONS_INTERFACE, NOTIFICATIONS_PATH, NOTIFICATIONS_SERVICE};
use crate::protocol::value::{BusValue, MethodCall, Signal, SignalMatch};

/// Urgency hint value the watch treats as "critical" (always shown).
const URGENCY_CRITICAL: u8 = 3;

/// Arguments of one `Notify` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyRequest {
    pub app_name: String,
    /// Remote id to replace in place, or 0 for a new notification.
    pub replaces_id: u32,
    pub app_icon: String,
    pub summary: String,
    pub body: String,
    pub vibration: VibrationProfile,
}

impl NotifyRequest {
    /// Builds the `a{sv}` hints dictionary the watch's feedback and preview
    /// daemons read.
    pub fn hints(&self) -> BTreeMap<String, BusValue> {
        let mut hints = BTreeMap::new();
        hints.insert(
            "x-nemo-feedback".to_string(),
            BusValue::from(self.vibration.as_str()),
        );
        hints.insert(
            "x-nemo-preview-body".to_string(),
            BusValue::from(self.body.as_str()),
        );
        hints.insert(
            "x-nemo-preview-summary".to_string(),
            BusValue::from(self.summary.as_str()),
        );
        hints.insert("urgency".to_string(), BusValue::Byte(URGENCY_CRITICAL));
        hints
    }

    pub fn into_call(self) -> MethodCall {
        let hints = self.hints();
        MethodCall::new(
            NOTIFICATIONS_SERVICE,
            NOTIFICATIONS_PATH,
            NOTIFICATIONS_INTERFACE,
            "Notify",
            vec![
                BusValue::Str(self.app_name),
                BusValue::UInt32(self.replaces_id),
                BusValue::Str(self.app_icon),
                BusValue::Str(self.summary),
                BusValue::Str(self.body),
                BusValue::StrList(Vec::new()),
                BusValue::Dict(hints),
                BusValue::Int32(0),
            ],
        )
    }
}

/// Extracts the id from a `Notify` reply body.
pub fn parse_notify_reply(reply: &[BusValue]) -> Option<u32> {
    reply.first().and_then(BusValue::as_u32)
}

pub fn close_notification_call(id: u32) -> MethodCall {
    MethodCall::new(
        NOTIFICATIONS_SERVICE,
        NOTIFICATIONS_PATH,
        NOTIFICATIONS_INTERFACE,
        "CloseNotification",
        vec![BusValue::UInt32(id)],
    )
}

/// The `NotificationClosed(id, reason)` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationClosed {
    pub id: u32,
    pub reason: CloseReason,
}

impl NotificationClosed {
    pub fn signal_match() -> SignalMatch {
        SignalMatch::new(NOTIFICATIONS_INTERFACE, "NotificationClosed")
    }

    /// Decodes the signal; returns `None` for any other signal or a
    /// malformed body.
    pub fn from_signal(signal: &Signal) -> Option<Self> {
        if !Self::signal_match().matches(signal) {
            return None;
        }
        let id = signal.args.first()?.as_u32()?;
        let reason = signal.args.get(1)?.as_u32()?;
        Some(Self {
            id,
            reason: CloseReason::from_code(reason),
        })
    }

    pub fn into_signal(self) -> Signal {
        Signal::new(
            NOTIFICATIONS_PATH,
            NOTIFICATIONS_INTERFACE,
            "NotificationClosed",
            vec![BusValue::UInt32(self.id), BusValue::UInt32(self.reason.code())],
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NotifyRequest {
        NotifyRequest {
            app_name: "Chat".into(),
            replaces_id: 0,
            app_icon: "ios-chatbubbles".into(),
            summary: "Alice".into(),
            body: "lunch?".into(),
            vibration: VibrationProfile::Strong,
        }
    }

    #[test]
    fn test_notify_call_targets_notification_service() {
        // Act
        let call = request().into_call();

        // Assert
        assert_eq!(call.destination.as_deref(), Some(NOTIFICATIONS_SERVICE));
        assert_eq!(call.path, NOTIFICATIONS_PATH);
        assert_eq!(call.member, "Notify");
        assert_eq!(call.args.len(), 8);
        assert_eq!(call.args[0].as_str(), Some("Chat"));
        assert_eq!(call.args[1].as_u32(), Some(0));
        assert_eq!(call.args[3].as_str(), Some("Alice"));
        assert_eq!(call.args[7], BusValue::Int32(0));
    }

    #[test]
    fn test_notify_hints_carry_vibration_and_preview() {
        let hints = request().hints();
        assert_eq!(hints["x-nemo-feedback"].as_str(), Some("notif_strong"));
        assert_eq!(hints["x-nemo-preview-body"].as_str(), Some("lunch?"));
        assert_eq!(hints["x-nemo-preview-summary"].as_str(), Some("Alice"));
        assert_eq!(hints["urgency"], BusValue::Byte(3));
    }

    #[test]
    fn test_parse_notify_reply() {
        assert_eq!(parse_notify_reply(&[BusValue::UInt32(12)]), Some(12));
        assert_eq!(parse_notify_reply(&[]), None);
        assert_eq!(parse_notify_reply(&[BusValue::from("12")]), None);
    }

    #[test]
    fn test_notification_closed_decodes_own_signal() {
        // Arrange
        let sig = NotificationClosed {
            id: 5,
            reason: CloseReason::DismissedByUser,
        }
        .into_signal();

        // Act
        let decoded = NotificationClosed::from_signal(&sig);

        // Assert
        assert_eq!(
            decoded,
            Some(NotificationClosed {
                id: 5,
                reason: CloseReason::DismissedByUser
            })
        );
    }

    #[test]
    fn test_notification_closed_ignores_other_signals() {
        let other = Signal::new(NOTIFICATIONS_PATH, NOTIFICATIONS_INTERFACE, "ActionInvoked", vec![
            BusValue::UInt32(5),
            BusValue::from("default"),
        ]);
        assert_eq!(NotificationClosed::from_signal(&other), None);
    }

    #[test]
    fn test_notification_closed_rejects_short_body() {
        let short = Signal::new(
            NOTIFICATIONS_PATH,
            NOTIFICATIONS_INTERFACE,
            "NotificationClosed",
            vec![BusValue::UInt32(5)],
        );
        assert_eq!(NotificationClosed::from_signal(&short), None);
    }

    #[test]
    fn test_close_call_carries_id() {
        let call = close_notification_call(44);
        assert_eq!(call.member, "CloseNotification");
        assert_eq!(call.args, vec![BusValue::UInt32(44)]);
    }
}
