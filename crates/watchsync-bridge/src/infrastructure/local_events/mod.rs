//! Local event feed: the phone-side notification listener, as JSON lines.
//!
//! # Inbound feed
//!
//! One JSON object per line, tagged by `event`:
//!
//! ```text
//! {"event":"posted","key":"0|org.example.chat|1|null|10001","packageName":"org.example.chat","summary":"Alice","body":"Lunch?"}
//! {"event":"removed","key":"0|org.example.chat|1|null|10001"}
//! {"event":"device","state":"connected"}
//! {"event":"battery","level":80}
//! {"event":"time","reason":"time-zone-changed"}
//! ```
//!
//! `posted`/`removed` are published on the hub after the notification
//! filter.  `device` and `battery` stand in for the BLE transport, which
//! lives outside this crate.  `time` relays the phone's clock and zone
//! change broadcasts.  Malformed lines are logged and skipped.
//!
//! # Outbound requests
//!
//! Dismissals and refreshes the bridges ask of the listener are written as
//! `{"request":"dismiss","key":"..."}` and `{"request":"refresh"}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use watchsync_core::{
    uuids, ConnectionState, LocalNotificationEvent, NotificationFilter, PostedNotification,
};

use crate::application::device::Device;
use crate::application::event_hub::{EventHub, NotificationEvent, TimeSyncReason};

/// One line of the inbound feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum FeedEvent {
    Posted(PostedNotification),
    Removed { key: String },
    Device { state: ConnectionState },
    Battery { level: u8 },
    Time { reason: TimeSyncReason },
}

/// One line written back to the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum ListenerRequest {
    Dismiss { key: String },
    Refresh,
}

impl ListenerRequest {
    fn from_event(event: &NotificationEvent) -> Option<Self> {
        match event {
            NotificationEvent::DismissRequested { key } => Some(Self::Dismiss { key: key.clone() }),
            NotificationEvent::RefreshRequested => Some(Self::Refresh),
            NotificationEvent::Local(_) => None,
        }
    }
}

/// Counters reported when the feed ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub applied: usize,
    pub filtered: usize,
    pub malformed: usize,
}

/// Parses one feed line.  Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<FeedEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Routes feed lines from `reader` until end of input.
///
/// # Errors
///
/// Only I/O errors on `reader` end the pump early.
pub async fn pump_feed<R>(
    reader: R,
    device: Arc<Device>,
    hub: Arc<EventHub>,
    filter: NotificationFilter,
) -> std::io::Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = FeedStats::default();
    while let Some(line) = lines.next_line().await? {
        let event = match parse_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "skipping malformed feed line");
                stats.malformed += 1;
                continue;
            }
        };
        if apply(event, &device, &hub, &filter) {
            stats.applied += 1;
        } else {
            stats.filtered += 1;
        }
    }
    info!(?stats, "local event feed ended");
    Ok(stats)
}

fn apply(event: FeedEvent, device: &Device, hub: &EventHub, filter: &NotificationFilter) -> bool {
    match event {
        FeedEvent::Posted(notification) => {
            if !filter.accepts(&notification) {
                debug!(key = %notification.key, package = %notification.package_name, "notification filtered");
                return false;
            }
            hub.publish_notification(NotificationEvent::Local(LocalNotificationEvent::Posted(
                notification,
            )));
        }
        FeedEvent::Removed { key } => {
            hub.publish_notification(NotificationEvent::Local(LocalNotificationEvent::Removed {
                key,
            }));
        }
        FeedEvent::Device { state } => device.set_connection_state(state),
        FeedEvent::Battery { level } => {
            if !device.dispatch_inbound(uuids::BATTERY_LEVEL, &[level]) {
                debug!(level, "battery level while nothing listens");
            }
        }
        FeedEvent::Time { reason } => hub.request_time_sync(reason),
    }
    true
}

/// Writes listener requests from the hub to `writer` until the hub closes.
pub async fn write_requests<W>(
    mut events: broadcast::Receiver<NotificationEvent>,
    mut writer: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "listener requests lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(request) = ListenerRequest::from_event(&event) else {
            continue;
        };
        let mut line = serde_json::to_string(&request).map_err(std::io::Error::other)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
