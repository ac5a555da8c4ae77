//! Media bridge: mirrors one local media session as an MPRIS-style player
//! object on the watch's bus.
//!
//! # Data flow
//!
//! ```text
//!   EventHub ──active sessions──▶ supervisor ──bind/unbind──▶ MediaInner
//!                                                               │
//!   MediaController ──SessionEvent──▶ listener ──PropertiesChanged──▶ channel.submit
//!                                                               │
//!   watch ──Get/Set/Play/Seek──▶ MprisObject ──PlayerRequest──▶ MediaController
//! ```
//!
//! At most one controller is bound at a time.  Each bind bumps a
//! *generation* counter; events and broadcasts carrying an older
//! generation are discarded, so a detached session can never leak property
//! changes after the next one is bound.
//!
//! Remote commands are checked against the session's available commands
//! first.  An unavailable command, or no session at all, is a silent
//! no-op: the watch cannot know the phone app's capabilities in advance.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use watchsync_core::protocol::mpris;
use watchsync_core::protocol::names::{
    DEFAULT_MPRIS_BUS_NAME, MPRIS_PATH, MPRIS_PLAYER_INTERFACE, MPRIS_ROOT_INTERFACE,
    PROPERTIES_INTERFACE,
};
use watchsync_core::{uuids, BusValue, PlayerCommand, PlayerSnapshot, ServiceDescriptor, Signal};

use crate::application::connection_channel::{BusHandle, ConnectionChannel};
use crate::application::device::ConnectivityService;
use crate::application::event_hub::EventHub;
use crate::application::media_properties::{self as properties, PropertyContext};
use crate::application::media_session::{PlayerRequest, SessionEvent, SessionHandle};
use crate::application::remote_bus::{BusError, MethodError, ObjectHandler};

/// Construction parameters for [`MediaBridge`].
#[derive(Debug, Clone, PartialEq)]
pub struct MediaBridgeSettings {
    /// Well-known name claimed on the watch's bus.
    pub bus_name: String,
    /// Root `Identity` property.
    pub identity: String,
    /// Upper bound on one session snapshot read.
    pub property_timeout: Duration,
}

impl Default for MediaBridgeSettings {
    fn default() -> Self {
        Self {
            bus_name: DEFAULT_MPRIS_BUS_NAME.to_string(),
            identity: "Android".to_string(),
            property_timeout: Duration::from_millis(500),
        }
    }
}

/// Properties included in the full broadcast after a bind.
///
/// `Position` is left out: it changes continuously and is announced through
/// `Seeked` instead.
const FULL_BROADCAST: [&str; 13] = [
    "PlaybackStatus",
    "LoopStatus",
    "Rate",
    "Shuffle",
    "Metadata",
    "Volume",
    "MinimumRate",
    "MaximumRate",
    "CanGoNext",
    "CanGoPrevious",
    "CanPlay",
    "CanPause",
    "CanSeek",
];

/// Properties re-broadcast for each class of session event.
fn changed_properties(event: SessionEvent) -> &'static [&'static str] {
    match event {
        SessionEvent::TrackChanged => &["Metadata"],
        SessionEvent::PlayStateChanged => &["PlaybackStatus"],
        SessionEvent::VolumeChanged => &["Volume"],
        SessionEvent::RepeatModeChanged => &["LoopStatus"],
        SessionEvent::ShuffleChanged => &["Shuffle"],
        SessionEvent::SpeedChanged => &["Rate"],
        SessionEvent::AvailableCommandsChanged => &properties::CAPABILITY_PROPERTIES,
        SessionEvent::PositionDiscontinuity { .. } => &[],
    }
}

#[derive(Default)]
struct SessionState {
    controller: Option<SessionHandle>,
    listener: Option<JoinHandle<()>>,
    /// Last value sent per property; equal values are not re-sent.
    last_broadcast: HashMap<&'static str, BusValue>,
    generation: u64,
}

struct MediaInner {
    channel: Arc<ConnectionChannel>,
    hub: Arc<EventHub>,
    settings: MediaBridgeSettings,
    session: Mutex<SessionState>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    synced: AtomicBool,
}

/// Connectivity module exposing the local media session to the watch.
pub struct MediaBridge {
    descriptor: ServiceDescriptor,
    inner: Arc<MediaInner>,
}

impl MediaBridge {
    pub fn new(
        channel: Arc<ConnectionChannel>,
        hub: Arc<EventHub>,
        settings: MediaBridgeSettings,
    ) -> Self {
        Self {
            descriptor: ServiceDescriptor::new(uuids::MEDIA_SERVICE, "media"),
            inner: Arc::new(MediaInner {
                channel,
                hub,
                settings,
                session: Mutex::new(SessionState::default()),
                supervisor: Mutex::new(None),
                synced: AtomicBool::new(false),
            }),
        }
    }

    // ── Session binding ───────────────────────────────────────────────────────

    /// Binds `controller`, replacing any bound session, and broadcasts the
    /// full property set.
    pub async fn bind_session(&self, controller: SessionHandle) {
        self.inner.bind(controller, false).await;
    }

    /// Detaches the bound session and announces "stopped, no track".
    pub fn unbind_session(&self) {
        self.inner.unbind();
    }

    pub fn is_bound(&self) -> bool {
        self.inner.lock_session().controller.is_some()
    }

    /// Package of the bound session, if any.
    pub fn bound_package(&self) -> Option<String> {
        self.inner
            .lock_session()
            .controller
            .as_ref()
            .map(|c| c.package_name().to_string())
    }

    // ── Remote commands ───────────────────────────────────────────────────────

    pub async fn play(&self) {
        self.inner.request(PlayerRequest::Play).await;
    }

    pub async fn pause(&self) {
        self.inner.request(PlayerRequest::Pause).await;
    }

    pub async fn play_pause(&self) {
        self.inner.play_pause().await;
    }

    pub async fn stop(&self) {
        self.inner.request(PlayerRequest::Stop).await;
    }

    pub async fn next(&self) {
        self.inner.request(PlayerRequest::SeekToNext).await;
    }

    pub async fn previous(&self) {
        self.inner.request(PlayerRequest::SeekToPrevious).await;
    }

    /// Seeks relative to the current position by `offset_us` microseconds.
    pub async fn seek(&self, offset_us: i64) {
        self.inner.seek(offset_us).await;
    }

    /// Seeks to `position_us` if `track_id` is still the current track.
    pub async fn set_position(&self, track_id: &str, position_us: i64) {
        self.inner.set_position(track_id, position_us).await;
    }

    // ── Properties ────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`MethodError::UnknownProperty`] for a name not in the table.
    pub async fn get_property(&self, interface: &str, name: &str) -> Result<BusValue, MethodError> {
        self.inner.get_property(interface, name).await
    }

    /// # Errors
    ///
    /// [`MethodError::InvalidArgs`] for an interface the object does not
    /// implement.
    pub async fn get_all(&self, interface: &str) -> Result<BTreeMap<String, BusValue>, MethodError> {
        self.inner.get_all(interface).await
    }

    /// Writes a property.  An unavailable capability is a silent no-op.
    ///
    /// # Errors
    ///
    /// [`MethodError::UnknownProperty`], [`MethodError::ReadOnlyProperty`],
    /// or [`MethodError::InvalidArgs`] when the value has the wrong type.
    pub async fn set_property(
        &self,
        interface: &str,
        name: &str,
        value: BusValue,
    ) -> Result<(), MethodError> {
        self.inner.set_property(interface, name, value).await
    }
}

impl ConnectivityService for MediaBridge {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Claims the bus name, exports the player object, and starts following
    /// the active session list.
    fn sync(&self) {
        if self.inner.synced.swap(true, Ordering::AcqRel) {
            return;
        }
        let bus_name = self.inner.settings.bus_name.clone();
        let handler: Arc<dyn ObjectHandler> = Arc::new(MprisObject {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner
            .channel
            .submit("media.export", move |bus| export_player(bus, bus_name, handler));

        let task = tokio::spawn(Arc::clone(&self.inner).supervise());
        if let Some(previous) = self.inner.lock_supervisor().replace(task) {
            previous.abort();
        }
        info!(bus_name = %self.inner.settings.bus_name, "media bridge synced");
    }

    fn unsync(&self) {
        if !self.inner.synced.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.inner.lock_supervisor().take() {
            task.abort();
        }
        self.inner.detach();
        let bus_name = self.inner.settings.bus_name.clone();
        self.inner
            .channel
            .submit("media.unexport", move |bus| unexport_player(bus, bus_name));
        info!("media bridge unsynced");
    }
}

async fn export_player(
    bus: BusHandle,
    bus_name: String,
    handler: Arc<dyn ObjectHandler>,
) -> Result<(), BusError> {
    bus.request_name(&bus_name).await?;
    bus.export_object(MPRIS_PATH, handler).await
}

async fn unexport_player(bus: BusHandle, bus_name: String) -> Result<(), BusError> {
    bus.unexport_object(MPRIS_PATH).await?;
    bus.release_name(&bus_name).await
}

fn same_controller(a: &SessionHandle, b: &SessionHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

// ── Inner state ───────────────────────────────────────────────────────────────

impl MediaInner {
    fn lock_session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_supervisor(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.supervisor.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn current_controller(&self) -> Option<SessionHandle> {
        self.lock_session().controller.clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_session().generation == generation
    }

    /// Follows the hub's active-session list for as long as the bridge is
    /// synced.
    async fn supervise(self: Arc<Self>) {
        let mut sessions = self.hub.watch_media_sessions();
        loop {
            let first = sessions.borrow_and_update().0.first().cloned();
            match first {
                Some(controller) => {
                    let already_bound = self
                        .current_controller()
                        .is_some_and(|current| same_controller(&current, &controller));
                    if !already_bound {
                        self.bind(controller, true).await;
                    }
                }
                None => self.unbind(),
            }
            if sessions.changed().await.is_err() {
                break;
            }
        }
    }

    /// Binds `controller`.  With `supervised` set, the bind is dropped when
    /// the bridge was unsynced while it was in progress.
    async fn bind(self: &Arc<Self>, controller: SessionHandle, supervised: bool) {
        // Subscribe before the first snapshot so no change slips between them.
        let events = controller.events();
        let generation = {
            let mut state = self.lock_session();
            // `unsync` clears `synced` before taking this lock to detach.
            if supervised && !self.synced.load(Ordering::Acquire) {
                debug!(package = controller.package_name(), "bridge unsynced; bind dropped");
                return;
            }
            if let Some(listener) = state.listener.take() {
                listener.abort();
            }
            state.controller = Some(Arc::clone(&controller));
            state.last_broadcast.clear();
            state.generation += 1;
            state.generation
        };
        info!(package = controller.package_name(), generation, "media session bound");

        let listener = tokio::spawn(Arc::clone(self).listen(generation, events));
        {
            let mut state = self.lock_session();
            if state.generation == generation {
                state.listener = Some(listener);
            } else {
                listener.abort();
            }
        }

        self.broadcast_full(generation).await;
    }

    fn unbind(&self) {
        let had_controller = self.release_controller();
        if !had_controller {
            return;
        }
        let ctx = PropertyContext {
            snapshot: None,
            identity: &self.settings.identity,
        };
        let changed =
            properties::get_named(MPRIS_PLAYER_INTERFACE, &["PlaybackStatus", "Metadata"], &ctx);
        {
            let mut state = self.lock_session();
            for (name, value) in &changed {
                if let Some(def) = properties::find(MPRIS_PLAYER_INTERFACE, name) {
                    state.last_broadcast.insert(def.name, value.clone());
                }
            }
        }
        info!("media session unbound");
        self.emit(
            "media.unbound",
            mpris::properties_changed(MPRIS_PLAYER_INTERFACE, changed),
        );
    }

    /// Drops the controller without telling the watch.
    fn detach(&self) {
        if self.release_controller() {
            debug!("media session detached");
        }
    }

    fn release_controller(&self) -> bool {
        let mut state = self.lock_session();
        if let Some(listener) = state.listener.take() {
            listener.abort();
        }
        state.generation += 1;
        state.last_broadcast.clear();
        state.controller.take().is_some()
    }

    async fn listen(self: Arc<Self>, generation: u64, mut events: broadcast::Receiver<SessionEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.on_session_event(generation, event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "media session events lagged; re-broadcasting everything");
                    self.broadcast_full(generation).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn on_session_event(&self, generation: u64, event: SessionEvent) {
        if !self.is_current(generation) {
            return;
        }
        debug!(?event, "media session event");
        if let SessionEvent::PositionDiscontinuity { position_ms } = event {
            self.emit("media.seeked", mpris::seeked(position_ms.saturating_mul(1000)));
            return;
        }
        let Some(snapshot) = self.snapshot().await else {
            return;
        };
        self.broadcast(generation, changed_properties(event), &snapshot);
    }

    async fn broadcast_full(&self, generation: u64) {
        let Some(snapshot) = self.snapshot().await else {
            return;
        };
        self.broadcast(generation, &FULL_BROADCAST, &snapshot);
    }

    /// Sends the subset of `names` whose values differ from the last
    /// broadcast.
    fn broadcast(&self, generation: u64, names: &[&str], snapshot: &PlayerSnapshot) {
        let ctx = PropertyContext {
            snapshot: Some(snapshot),
            identity: &self.settings.identity,
        };
        let mut changed = BTreeMap::new();
        {
            let mut state = self.lock_session();
            if state.generation != generation || state.controller.is_none() {
                return;
            }
            for def in names
                .iter()
                .filter_map(|name| properties::find(MPRIS_PLAYER_INTERFACE, name))
            {
                let value = (def.get)(&ctx);
                if state.last_broadcast.get(def.name) == Some(&value) {
                    continue;
                }
                state.last_broadcast.insert(def.name, value.clone());
                changed.insert(def.name.to_string(), value);
            }
        }
        if changed.is_empty() {
            return;
        }
        self.emit(
            "media.properties_changed",
            mpris::properties_changed(MPRIS_PLAYER_INTERFACE, changed),
        );
    }

    fn emit(&self, label: &'static str, signal: Signal) {
        self.channel
            .submit(label, move |bus| async move { bus.emit_signal(signal).await });
    }

    /// Reads the bound session with a bounded wait.
    ///
    /// `None` when nothing is bound or the session did not answer in time.
    async fn snapshot(&self) -> Option<PlayerSnapshot> {
        let controller = self.current_controller()?;
        match tokio::time::timeout(self.settings.property_timeout, controller.snapshot()).await {
            Ok(snapshot) => Some(snapshot),
            Err(_) => {
                warn!(
                    package = controller.package_name(),
                    timeout_ms = self.settings.property_timeout.as_millis() as u64,
                    "media session did not answer in time"
                );
                None
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Forwards `request` if the bound session currently allows it.
    async fn request(&self, request: PlayerRequest) {
        let Some(controller) = self.current_controller() else {
            debug!(?request, "no media session bound; ignoring");
            return;
        };
        let Some(snapshot) = self.snapshot().await else {
            return;
        };
        if !snapshot.can(request.required_command()) {
            debug!(?request, "command unavailable; ignoring");
            return;
        }
        controller.execute(request).await;
    }

    async fn play_pause(&self) {
        let Some(snapshot) = self.snapshot().await else {
            return;
        };
        let request = if snapshot.is_playing {
            PlayerRequest::Pause
        } else {
            PlayerRequest::Play
        };
        self.request(request).await;
    }

    /// Snapshot of a session that may seek within its current item.
    async fn seekable_snapshot(&self) -> Option<(SessionHandle, PlayerSnapshot)> {
        let controller = self.current_controller()?;
        let snapshot = self.snapshot().await?;
        if snapshot.can(PlayerCommand::SeekInCurrentItem) && snapshot.current_item_seekable {
            Some((controller, snapshot))
        } else {
            debug!("seek unavailable; ignoring");
            None
        }
    }

    async fn seek(&self, offset_us: i64) {
        let Some((controller, snapshot)) = self.seekable_snapshot().await else {
            return;
        };
        let mut target = snapshot.position_ms.saturating_add(offset_us / 1000).max(0);
        if let Some(duration_ms) = snapshot.current_item.as_ref().and_then(|i| i.duration_ms) {
            target = target.min(duration_ms);
        }
        controller
            .execute(PlayerRequest::SeekTo { position_ms: target })
            .await;
    }

    async fn set_position(&self, track_id: &str, position_us: i64) {
        let Some((controller, snapshot)) = self.seekable_snapshot().await else {
            return;
        };
        if snapshot.track_path().as_deref() != Some(track_id) {
            debug!(track_id, "SetPosition for a stale track; ignoring");
            return;
        }
        let duration_us = snapshot
            .current_item
            .as_ref()
            .and_then(|i| i.duration_ms)
            .map(|ms| ms.saturating_mul(1000));
        if position_us < 0 || duration_us.is_some_and(|d| position_us > d) {
            debug!(position_us, "SetPosition outside the track; ignoring");
            return;
        }
        controller
            .execute(PlayerRequest::SeekTo {
                position_ms: position_us / 1000,
            })
            .await;
    }

    // ── Properties ────────────────────────────────────────────────────────────

    async fn get_property(&self, interface: &str, name: &str) -> Result<BusValue, MethodError> {
        let def = properties::find(interface, name).ok_or_else(|| MethodError::UnknownProperty {
            interface: interface.to_string(),
            name: name.to_string(),
        })?;
        let snapshot = self.snapshot().await;
        let ctx = PropertyContext {
            snapshot: snapshot.as_ref(),
            identity: &self.settings.identity,
        };
        Ok((def.get)(&ctx))
    }

    async fn get_all(&self, interface: &str) -> Result<BTreeMap<String, BusValue>, MethodError> {
        if !properties::is_known_interface(interface) {
            return Err(MethodError::InvalidArgs(format!("unknown interface {interface}")));
        }
        let snapshot = self.snapshot().await;
        let ctx = PropertyContext {
            snapshot: snapshot.as_ref(),
            identity: &self.settings.identity,
        };
        Ok(properties::get_all(interface, &ctx))
    }

    async fn set_property(
        &self,
        interface: &str,
        name: &str,
        value: BusValue,
    ) -> Result<(), MethodError> {
        let def = properties::find(interface, name).ok_or_else(|| MethodError::UnknownProperty {
            interface: interface.to_string(),
            name: name.to_string(),
        })?;
        let setter = def
            .set
            .ok_or_else(|| MethodError::ReadOnlyProperty(name.to_string()))?;
        let value = value.unwrap_variant();
        if value.bus_type() != def.ty {
            return Err(MethodError::InvalidArgs(format!(
                "{name} expects type {}, got {}",
                def.ty.signature(),
                value.bus_type().signature()
            )));
        }
        match setter(value) {
            Some(request) => self.request(request).await,
            None => debug!(name, "ignoring out-of-range property value"),
        }
        Ok(())
    }
}

// ── Exported object ───────────────────────────────────────────────────────────

/// The `/org/mpris/MediaPlayer2` object as seen by the watch.
struct MprisObject {
    inner: Weak<MediaInner>,
}

fn arg_str(args: &[BusValue], index: usize) -> Result<&str, MethodError> {
    args.get(index)
        .and_then(BusValue::as_str)
        .ok_or_else(|| MethodError::InvalidArgs(format!("argument {index} must be a string")))
}

fn arg_i64(args: &[BusValue], index: usize) -> Result<i64, MethodError> {
    args.get(index)
        .and_then(BusValue::as_i64)
        .ok_or_else(|| MethodError::InvalidArgs(format!("argument {index} must be an integer")))
}

#[async_trait]
impl ObjectHandler for MprisObject {
    async fn handle_call(
        &self,
        interface: &str,
        member: &str,
        args: Vec<BusValue>,
    ) -> Result<Vec<BusValue>, MethodError> {
        let unknown = || MethodError::UnknownMethod {
            interface: interface.to_string(),
            member: member.to_string(),
        };
        let inner = self.inner.upgrade().ok_or_else(unknown)?;

        match (interface, member) {
            (PROPERTIES_INTERFACE, "Get") => {
                let value = inner
                    .get_property(arg_str(&args, 0)?, arg_str(&args, 1)?)
                    .await?;
                Ok(vec![BusValue::variant(value)])
            }
            (PROPERTIES_INTERFACE, "GetAll") => {
                let all = inner.get_all(arg_str(&args, 0)?).await?;
                let wrapped = all
                    .into_iter()
                    .map(|(name, value)| (name, BusValue::variant(value)))
                    .collect();
                Ok(vec![BusValue::Dict(wrapped)])
            }
            (PROPERTIES_INTERFACE, "Set") => {
                let value = args
                    .get(2)
                    .cloned()
                    .ok_or_else(|| MethodError::InvalidArgs("missing value".to_string()))?;
                inner
                    .set_property(arg_str(&args, 0)?, arg_str(&args, 1)?, value)
                    .await?;
                Ok(Vec::new())
            }
            (MPRIS_ROOT_INTERFACE, "Raise" | "Quit") => Ok(Vec::new()),
            (MPRIS_PLAYER_INTERFACE, _) => {
                match member {
                    "Play" => inner.request(PlayerRequest::Play).await,
                    "Pause" => inner.request(PlayerRequest::Pause).await,
                    "PlayPause" => inner.play_pause().await,
                    "Stop" => inner.request(PlayerRequest::Stop).await,
                    "Next" => inner.request(PlayerRequest::SeekToNext).await,
                    "Previous" => inner.request(PlayerRequest::SeekToPrevious).await,
                    "Seek" => inner.seek(arg_i64(&args, 0)?).await,
                    "SetPosition" => {
                        inner
                            .set_position(arg_str(&args, 0)?, arg_i64(&args, 1)?)
                            .await
                    }
                    "OpenUri" => {}
                    _ => return Err(unknown()),
                }
                Ok(Vec::new())
            }
            _ => Err(unknown()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use watchsync_core::{AvailableCommands, MediaItem, PlayerState, NO_TRACK_PATH};

    use super::*;
    use crate::application::remote_bus::BusConnector;
    use crate::infrastructure::media::FakeMediaController;
    use crate::infrastructure::remote_bus::memory::{MemoryBus, MemoryConnector};

    const ADDRESS: &str = "tcp:host=127.0.0.1,port=55556";

    struct Fixture {
        bridge: MediaBridge,
        channel: Arc<ConnectionChannel>,
        hub: Arc<EventHub>,
        bus: Arc<MemoryBus>,
    }

    async fn fixture() -> Fixture {
        let connector = Arc::new(MemoryConnector::new());
        let bus = connector.bus();
        let dyn_connector: Arc<dyn BusConnector> = connector;
        let channel = Arc::new(ConnectionChannel::new(
            "media-test",
            dyn_connector,
            Duration::from_secs(5),
        ));
        channel.open(ADDRESS);
        channel.flush().await.unwrap();
        bus.take_signals();
        let hub = Arc::new(EventHub::new());
        let bridge = MediaBridge::new(
            Arc::clone(&channel),
            Arc::clone(&hub),
            MediaBridgeSettings::default(),
        );
        Fixture {
            bridge,
            channel,
            hub,
            bus,
        }
    }

    fn playing_snapshot() -> PlayerSnapshot {
        let mut item = MediaItem::new("id-1", "Song");
        item.duration_ms = Some(200_000);
        PlayerSnapshot {
            is_playing: true,
            play_when_ready: true,
            state: PlayerState::Ready,
            position_ms: 10_000,
            current_item: Some(item),
            current_item_seekable: true,
            available: AvailableCommands::all(),
            ..PlayerSnapshot::idle("org.example.player")
        }
    }

    fn changed_names(signals: &[Signal]) -> Vec<Vec<String>> {
        signals
            .iter()
            .filter_map(mpris::changed_property_names)
            .map(|names| names.into_iter().map(str::to_string).collect())
            .collect()
    }

    fn changed_value(signal: &Signal, name: &str) -> Option<BusValue> {
        signal.args.get(1)?.as_dict()?.get(name).cloned()
    }

    #[tokio::test]
    async fn test_bind_broadcasts_full_property_set() {
        // Arrange
        let f = fixture().await;
        let player = Arc::new(FakeMediaController::new(playing_snapshot()));

        // Act
        f.bridge.bind_session(player).await;
        f.channel.flush().await.unwrap();

        // Assert
        let signals = f.bus.take_signals();
        assert_eq!(signals.len(), 1);
        let names = &changed_names(&signals)[0];
        assert!(names.contains(&"PlaybackStatus".to_string()));
        assert!(names.contains(&"Metadata".to_string()));
        assert!(!names.contains(&"Position".to_string()));
        assert_eq!(f.bridge.bound_package().as_deref(), Some("org.example.player"));
    }

    #[tokio::test]
    async fn test_unbind_while_playing_broadcasts_stopped_and_no_track() {
        // Arrange
        let f = fixture().await;
        let player = Arc::new(FakeMediaController::new(playing_snapshot()));
        f.bridge.bind_session(player).await;
        f.channel.flush().await.unwrap();
        f.bus.take_signals();

        // Act
        f.bridge.unbind_session();
        f.channel.flush().await.unwrap();

        // Assert
        let signals = f.bus.take_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(
            changed_value(&signals[0], "PlaybackStatus"),
            Some(BusValue::from("Stopped"))
        );
        let metadata = changed_value(&signals[0], "Metadata").unwrap();
        assert_eq!(
            metadata.as_dict().unwrap()["mpris:trackid"].as_str(),
            Some(NO_TRACK_PATH)
        );
        assert!(!f.bridge.is_bound());
    }

    #[tokio::test]
    async fn test_unbind_without_session_is_silent() {
        let f = fixture().await;

        f.bridge.unbind_session();
        f.channel.flush().await.unwrap();

        assert!(f.bus.signals().is_empty());
    }

    #[tokio::test]
    async fn test_seek_without_session_is_a_silent_no_op() {
        let f = fixture().await;

        f.bridge.seek(5_000_000).await;
        f.channel.flush().await.unwrap();

        assert!(f.bus.signals().is_empty());
        assert!(f.bus.calls().is_empty());
    }

    #[tokio::test]
    async fn test_session_events_broadcast_only_their_subset() {
        // Arrange
        let f = fixture().await;
        let player = Arc::new(FakeMediaController::new(playing_snapshot()));
        f.bridge.bind_session(player.clone()).await;
        f.channel.flush().await.unwrap();
        f.bus.take_signals();

        // Act
        let mut paused = playing_snapshot();
        paused.is_playing = false;
        paused.play_when_ready = false;
        player.set_snapshot(paused);
        player.emit(SessionEvent::PlayStateChanged);
        player.settle().await;
        f.channel.flush().await.unwrap();

        // Assert
        let signals = f.bus.take_signals();
        assert_eq!(changed_names(&signals), vec![vec!["PlaybackStatus".to_string()]]);
        assert_eq!(
            changed_value(&signals[0], "PlaybackStatus"),
            Some(BusValue::from("Paused"))
        );
    }

    #[tokio::test]
    async fn test_unchanged_values_are_not_rebroadcast() {
        let f = fixture().await;
        let player = Arc::new(FakeMediaController::new(playing_snapshot()));
        f.bridge.bind_session(player.clone()).await;
        f.channel.flush().await.unwrap();
        f.bus.take_signals();

        player.emit(SessionEvent::VolumeChanged);
        player.settle().await;
        f.channel.flush().await.unwrap();

        assert!(f.bus.take_signals().is_empty());
    }

    #[tokio::test]
    async fn test_position_discontinuity_emits_seeked_in_microseconds() {
        let f = fixture().await;
        let player = Arc::new(FakeMediaController::new(playing_snapshot()));
        f.bridge.bind_session(player.clone()).await;
        f.channel.flush().await.unwrap();
        f.bus.take_signals();

        player.emit(SessionEvent::PositionDiscontinuity { position_ms: 42_000 });
        player.settle().await;
        f.channel.flush().await.unwrap();

        assert_eq!(f.bus.take_signals(), vec![mpris::seeked(42_000_000)]);
    }

    #[tokio::test]
    async fn test_commands_are_gated_by_availability() {
        // Arrange
        let f = fixture().await;
        let mut snapshot = playing_snapshot();
        snapshot.available = AvailableCommands::all().without(PlayerCommand::Stop);
        let player = Arc::new(FakeMediaController::new(snapshot));
        f.bridge.bind_session(player.clone()).await;

        // Act
        f.bridge.stop().await;
        f.bridge.play_pause().await;
        f.bridge.next().await;

        // Assert
        assert_eq!(
            player.requests(),
            vec![PlayerRequest::Pause, PlayerRequest::SeekToNext]
        );
    }

    #[tokio::test]
    async fn test_seek_is_relative_and_clamped_to_track() {
        let f = fixture().await;
        let player = Arc::new(FakeMediaController::new(playing_snapshot()));
        f.bridge.bind_session(player.clone()).await;

        f.bridge.seek(5_000_000).await;
        f.bridge.seek(-60_000_000).await;
        f.bridge.seek(10_000_000_000).await;

        assert_eq!(
            player.requests(),
            vec![
                PlayerRequest::SeekTo { position_ms: 15_000 },
                PlayerRequest::SeekTo { position_ms: 0 },
                PlayerRequest::SeekTo { position_ms: 200_000 },
            ]
        );
    }

    #[tokio::test]
    async fn test_set_position_requires_current_track_and_valid_position() {
        // Arrange
        let f = fixture().await;
        let snapshot = playing_snapshot();
        let track = snapshot.track_path().unwrap();
        let player = Arc::new(FakeMediaController::new(snapshot));
        f.bridge.bind_session(player.clone()).await;

        // Act
        f.bridge.set_position("/org/example/player/0", 1_000_000).await;
        f.bridge.set_position(&track, -1).await;
        f.bridge.set_position(&track, 999_000_000).await;
        f.bridge.set_position(&track, 30_000_000).await;

        // Assert
        assert_eq!(
            player.requests(),
            vec![PlayerRequest::SeekTo { position_ms: 30_000 }]
        );
    }

    #[tokio::test]
    async fn test_set_property_validates_and_forwards() {
        // Arrange
        let f = fixture().await;
        let mut snapshot = playing_snapshot();
        snapshot.available = AvailableCommands::all().without(PlayerCommand::SetShuffleMode);
        let player = Arc::new(FakeMediaController::new(snapshot));
        f.bridge.bind_session(player.clone()).await;

        // Act
        let read_only = f
            .bridge
            .set_property(MPRIS_PLAYER_INTERFACE, "Metadata", BusValue::Dict(BTreeMap::new()))
            .await;
        let wrong_type = f
            .bridge
            .set_property(MPRIS_PLAYER_INTERFACE, "Volume", BusValue::from("loud"))
            .await;
        let unknown = f
            .bridge
            .set_property(MPRIS_PLAYER_INTERFACE, "Loudness", BusValue::Double(1.0))
            .await;
        let shuffle = f
            .bridge
            .set_property(MPRIS_PLAYER_INTERFACE, "Shuffle", BusValue::Bool(true))
            .await;
        let volume = f
            .bridge
            .set_property(
                MPRIS_PLAYER_INTERFACE,
                "Volume",
                BusValue::variant(BusValue::Double(0.25)),
            )
            .await;

        // Assert
        assert!(matches!(read_only, Err(MethodError::ReadOnlyProperty(_))));
        assert!(matches!(wrong_type, Err(MethodError::InvalidArgs(_))));
        assert!(matches!(unknown, Err(MethodError::UnknownProperty { .. })));
        assert!(shuffle.is_ok());
        assert!(volume.is_ok());
        assert_eq!(player.requests(), vec![PlayerRequest::SetVolume(0.25)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_session_reports_defaults() {
        // Arrange
        let f = fixture().await;
        let player = Arc::new(
            FakeMediaController::new(playing_snapshot()).with_delay(Duration::from_secs(5)),
        );
        f.bridge.bind_session(player.clone()).await;

        // Act
        let status = f
            .bridge
            .get_property(MPRIS_PLAYER_INTERFACE, "PlaybackStatus")
            .await
            .unwrap();

        // Assert
        assert_eq!(status, BusValue::from("Stopped"));
    }

    #[tokio::test]
    async fn test_sync_exports_object_and_follows_active_sessions() {
        // Arrange
        let f = fixture().await;
        let player: SessionHandle = Arc::new(FakeMediaController::new(playing_snapshot()));

        // Act
        f.bridge.sync();
        f.hub.publish_media_sessions(vec![Arc::clone(&player)]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.channel.flush().await.unwrap();

        // Assert
        assert_eq!(f.bus.owned_names(), vec![DEFAULT_MPRIS_BUS_NAME.to_string()]);
        assert_eq!(f.bus.exported_paths(), vec![MPRIS_PATH.to_string()]);
        assert!(f.bridge.is_bound());

        let status = f
            .bus
            .call_exported(
                MPRIS_PATH,
                PROPERTIES_INTERFACE,
                "Get",
                vec![
                    BusValue::from(MPRIS_PLAYER_INTERFACE),
                    BusValue::from("PlaybackStatus"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(status, vec![BusValue::variant(BusValue::from("Playing"))]);

        // Act: session list empties, then the module is unsynced
        f.hub.publish_media_sessions(Vec::new());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!f.bridge.is_bound());
        f.bridge.unsync();
        f.channel.flush().await.unwrap();

        // Assert
        assert!(f.bus.owned_names().is_empty());
        assert!(f.bus.exported_paths().is_empty());
    }

    #[tokio::test]
    async fn test_supervised_bind_after_unsync_leaves_nothing_bound() {
        // Arrange
        let f = fixture().await;
        let player: SessionHandle = Arc::new(FakeMediaController::new(playing_snapshot()));
        f.bridge.sync();
        f.bridge.unsync();
        f.channel.flush().await.unwrap();
        f.bus.take_signals();

        // Act: a supervisor bind that was already running when unsync happened
        f.bridge.inner.bind(Arc::clone(&player), true).await;
        f.channel.flush().await.unwrap();

        // Assert
        assert!(!f.bridge.is_bound());
        assert!(f.bridge.inner.lock_session().listener.is_none());
        assert!(changed_names(&f.bus.take_signals()).is_empty());
    }

    #[tokio::test]
    async fn test_resync_rebinds_and_rebroadcasts_full_set() {
        // Arrange
        let f = fixture().await;
        let player: SessionHandle = Arc::new(FakeMediaController::new(playing_snapshot()));
        f.hub.publish_media_sessions(vec![Arc::clone(&player)]);
        f.bridge.sync();
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.bridge.unsync();
        f.channel.flush().await.unwrap();
        assert!(!f.bridge.is_bound());
        f.bus.take_signals();

        // Act
        f.bridge.sync();
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.channel.flush().await.unwrap();

        // Assert
        assert!(f.bridge.is_bound());
        let names = changed_names(&f.bus.take_signals());
        assert!(names
            .iter()
            .any(|set| set.contains(&"Metadata".to_string())
                && set.contains(&"PlaybackStatus".to_string())));
    }

    #[tokio::test]
    async fn test_exported_object_rejects_unknown_members() {
        let f = fixture().await;
        f.bridge.sync();
        f.channel.flush().await.unwrap();

        let result = f
            .bus
            .call_exported(MPRIS_PATH, MPRIS_PLAYER_INTERFACE, "Explode", Vec::new())
            .await;
        let raise = f
            .bus
            .call_exported(MPRIS_PATH, MPRIS_ROOT_INTERFACE, "Raise", Vec::new())
            .await;

        assert!(matches!(result, Err(MethodError::UnknownMethod { .. })));
        assert_eq!(raise, Ok(Vec::new()));
        f.bridge.unsync();
    }
}
