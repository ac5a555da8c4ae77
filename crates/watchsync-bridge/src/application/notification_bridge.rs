//! Notification bridge: mirrors phone notifications onto the watch.
//!
//! # Lifecycle of one notification
//!
//! ```text
//!   Unknown ──posted──▶ Posted ──removed on phone──▶ Unknown   (CloseNotification sent)
//!                          │
//!                          └──dismissed on watch──▶ Unknown   (local dismissal requested)
//! ```
//!
//! The bridge keeps a bidirectional map between the phone's notification
//! key and the id the watch returned from `Notify`.  The map is what stops
//! a dismiss loop: a watch-side dismissal removes the pair *before* asking
//! the phone to cancel, so the phone's resulting "removed" event finds no
//! mapping and sends nothing back.
//!
//! Local events and remote signals arrive on different tasks; every map
//! access goes through one short critical section.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use watchsync_core::protocol::notifications::{close_notification_call, parse_notify_reply};
use watchsync_core::protocol::{NotificationClosed, NotifyRequest};
use watchsync_core::{
    uuids, CloseReason, LocalNotificationEvent, NotificationIdMap, PostedNotification,
    ServiceDescriptor,
};

use crate::application::connection_channel::{BusHandle, ConnectionChannel};
use crate::application::device::ConnectivityService;
use crate::application::event_hub::{EventHub, NotificationEvent};
use crate::application::preferences::PreferenceStore;
use crate::application::remote_bus::{BusError, MatchId};

#[derive(Default)]
struct MappingState {
    ids: NotificationIdMap,
    /// Posts per key whose `Notify` reply has not been stored yet.
    in_flight: HashMap<String, usize>,
}

struct NotificationInner {
    channel: Arc<ConnectionChannel>,
    hub: Arc<EventHub>,
    preferences: Arc<dyn PreferenceStore>,
    state: Mutex<MappingState>,
    match_id: Mutex<Option<MatchId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    synced: AtomicBool,
}

/// Connectivity module forwarding notifications to the watch.
pub struct NotificationBridge {
    descriptor: ServiceDescriptor,
    inner: Arc<NotificationInner>,
}

impl NotificationBridge {
    pub fn new(
        channel: Arc<ConnectionChannel>,
        hub: Arc<EventHub>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            descriptor: ServiceDescriptor::new(uuids::NOTIFICATION_SERVICE, "notifications"),
            inner: Arc::new(NotificationInner {
                channel,
                hub,
                preferences,
                state: Mutex::new(MappingState::default()),
                match_id: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                synced: AtomicBool::new(false),
            }),
        }
    }

    /// Forwards a posted notification, unless the app is muted.
    ///
    /// Reposting a key that is already on the watch updates it in place.
    pub fn on_local_posted(&self, notification: &PostedNotification) {
        self.inner.on_local_posted(notification);
    }

    /// Closes the watch copy of `key`, if it was ever forwarded.
    pub fn on_local_removed(&self, key: &str) {
        self.inner.on_local_removed(key);
    }

    /// Handles `NotificationClosed(id, reason)` from the watch.
    ///
    /// Returns the local key a dismissal was requested for, if any.
    pub fn on_remote_closed(&self, id: u32, reason: CloseReason) -> Option<String> {
        self.inner.on_remote_closed(id, reason)
    }

    /// Remote id currently mapped to `key`.
    pub fn remote_id(&self, key: &str) -> Option<u32> {
        self.inner.lock_state().ids.id_for(key)
    }

    pub fn mapped_count(&self) -> usize {
        self.inner.lock_state().ids.len()
    }
}

impl ConnectivityService for NotificationBridge {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Subscribes to `NotificationClosed`, starts consuming local events,
    /// and asks the local listener to replay what is active.
    fn sync(&self) {
        if self.inner.synced.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = &self.inner;

        let local_events = tokio::spawn(
            Arc::clone(inner).consume_local_events(inner.hub.subscribe_notifications()),
        );

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let subscriber = Arc::clone(inner);
        inner.channel.submit("notifications.subscribe", move |bus| {
            subscribe_closed(bus, subscriber, signals_tx)
        });
        let remote_signals = tokio::spawn(Arc::clone(inner).consume_remote_signals(signals_rx));

        inner
            .lock_tasks()
            .extend([local_events, remote_signals]);
        inner.hub.publish_notification(NotificationEvent::RefreshRequested);
        info!("notification bridge synced");
    }

    fn unsync(&self) {
        if !self.inner.synced.swap(false, Ordering::AcqRel) {
            return;
        }
        for task in self.inner.lock_tasks().drain(..) {
            task.abort();
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .channel
            .submit("notifications.unsubscribe", move |bus| unsubscribe_closed(bus, inner));
        info!("notification bridge unsynced");
    }
}

async fn subscribe_closed(
    bus: BusHandle,
    inner: Arc<NotificationInner>,
    sink: mpsc::UnboundedSender<watchsync_core::Signal>,
) -> Result<(), BusError> {
    let id = bus.add_match(NotificationClosed::signal_match(), sink).await?;
    let stale = inner.lock_match_id().replace(id);
    if let Some(stale) = stale {
        bus.remove_match(stale).await?;
    }
    Ok(())
}

async fn unsubscribe_closed(bus: BusHandle, inner: Arc<NotificationInner>) -> Result<(), BusError> {
    let id = inner.lock_match_id().take();
    match id {
        Some(id) => bus.remove_match(id).await,
        None => Ok(()),
    }
}

async fn post_notification(
    bus: BusHandle,
    inner: Arc<NotificationInner>,
    key: String,
    mut request: NotifyRequest,
    in_flight: InFlight,
) -> Result<(), BusError> {
    // Read at execution time so a repost queued behind the first post
    // replaces the id the first one received.
    request.replaces_id = inner.lock_state().ids.id_for(&key).unwrap_or(0);
    let reply = bus.call_method(request.into_call()).await?;
    let id = parse_notify_reply(&reply).ok_or_else(|| BusError::UnexpectedReply {
        call: "Notify".to_string(),
    })?;
    let replaced = inner.lock_state().ids.insert(key.clone(), id);
    debug!(key, id, ?replaced, "notification forwarded");
    drop(in_flight);
    Ok(())
}

async fn close_notification(bus: BusHandle, id: u32) -> Result<(), BusError> {
    bus.call_method(close_notification_call(id)).await.map(|_| ())
}

/// Removal queued behind an in-flight post; resolves the id on the worker.
async fn close_after_post(
    bus: BusHandle,
    inner: Arc<NotificationInner>,
    key: String,
) -> Result<(), BusError> {
    let id = inner.lock_state().ids.remove_by_key(&key);
    match id {
        Some(id) => close_notification(bus, id).await,
        None => Ok(()),
    }
}

/// Counts a post as in flight until its unit of work finishes or is
/// dropped.
struct InFlight {
    inner: Arc<NotificationInner>,
    key: String,
}

impl InFlight {
    fn start(inner: &Arc<NotificationInner>, key: &str) -> Self {
        *inner
            .lock_state()
            .in_flight
            .entry(key.to_string())
            .or_insert(0) += 1;
        Self {
            inner: Arc::clone(inner),
            key: key.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        if let Some(count) = state.in_flight.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                state.in_flight.remove(&self.key);
            }
        }
    }
}

impl NotificationInner {
    fn lock_state(&self) -> MutexGuard<'_, MappingState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_match_id(&self) -> MutexGuard<'_, Option<MatchId>> {
        self.match_id.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn on_local_posted(self: &Arc<Self>, notification: &PostedNotification) {
        let package = notification.package_name.as_str();
        self.preferences.mark_package_seen(package);
        let option = self.preferences.notification_option(package);
        let Some(vibration) = option.vibration() else {
            debug!(package, key = %notification.key, "notifications muted for app; ignoring");
            return;
        };

        let request = NotifyRequest {
            app_name: notification.app_name.clone(),
            replaces_id: 0,
            app_icon: notification.app_icon.clone(),
            summary: notification.summary.clone(),
            body: notification.body.clone(),
            vibration,
        };
        let key = notification.key.clone();
        let in_flight = InFlight::start(self, &key);
        let inner = Arc::clone(self);
        debug!(package, key, vibration = vibration.as_str(), "queueing Notify");
        self.channel.submit("notifications.notify", move |bus| {
            post_notification(bus, inner, key, request, in_flight)
        });
    }

    fn on_local_removed(self: &Arc<Self>, key: &str) {
        let (mapped, pending) = {
            let mut state = self.lock_state();
            if state.in_flight.contains_key(key) {
                (None, true)
            } else {
                (state.ids.remove_by_key(key), false)
            }
        };

        if pending {
            debug!(key, "removal while post in flight; deferring");
            let inner = Arc::clone(self);
            let key = key.to_string();
            self.channel
                .submit("notifications.close_deferred", move |bus| {
                    close_after_post(bus, inner, key)
                });
        } else if let Some(id) = mapped {
            debug!(key, id, "queueing CloseNotification");
            self.channel
                .submit("notifications.close", move |bus| close_notification(bus, id));
        } else {
            debug!(key, "removed notification was never forwarded; ignoring");
        }
    }

    fn on_remote_closed(&self, id: u32, reason: CloseReason) -> Option<String> {
        if reason != CloseReason::DismissedByUser {
            debug!(id, ?reason, "remote close not caused by the user; ignoring");
            return None;
        }
        let key = self.lock_state().ids.remove_by_id(id)?;
        info!(id, key, "notification dismissed on watch");
        self.hub.publish_notification(NotificationEvent::DismissRequested { key: key.clone() });
        Some(key)
    }

    async fn consume_local_events(self: Arc<Self>, mut events: broadcast::Receiver<NotificationEvent>) {
        loop {
            match events.recv().await {
                Ok(NotificationEvent::Local(LocalNotificationEvent::Posted(notification))) => {
                    self.on_local_posted(&notification)
                }
                Ok(NotificationEvent::Local(LocalNotificationEvent::Removed { key })) => {
                    self.on_local_removed(&key)
                }
                Ok(NotificationEvent::DismissRequested { .. } | NotificationEvent::RefreshRequested) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification events lagged; some were not forwarded");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn consume_remote_signals(
        self: Arc<Self>,
        mut signals: mpsc::UnboundedReceiver<watchsync_core::Signal>,
    ) {
        while let Some(signal) = signals.recv().await {
            match NotificationClosed::from_signal(&signal) {
                Some(closed) => {
                    self.on_remote_closed(closed.id, closed.reason);
                }
                None => debug!(%signal, "ignoring unexpected signal"),
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
