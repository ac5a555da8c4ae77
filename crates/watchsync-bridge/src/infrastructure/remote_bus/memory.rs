//! In-memory loopback implementation of the remote bus.
//!
//! # Why a loopback bus?
//!
//! The real transport needs a watch (or an emulator) listening on a TCP
//! D-Bus address.  [`MemoryBus`] stands in for the watch side instead:
//!
//! - Every method call and emitted signal is recorded so tests can assert
//!   exactly what the bridge sent and in what order.
//! - It behaves like the watch's notification daemon: `Notify` hands out
//!   ids starting at 1 (or reuses `replaces_id`), and `CloseNotification`
//!   answers with a `NotificationClosed(id, 3)` signal.
//! - Tests play the watch user by injecting signals with
//!   [`MemoryBus::inject_signal`] and calling exported objects with
//!   [`MemoryBus::call_exported`].
//!
//! The binary also uses it for `--dry-run`, where nothing leaves the process.
//!
//! [`MemoryConnector`] always hands out the same shared [`MemoryBus`], so a
//! test keeps a reference to "the watch" across reconnects.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use watchsync_core::protocol::names::{NOTIFICATIONS_INTERFACE, NOTIFICATIONS_PATH};
use watchsync_core::protocol::NotificationClosed;
use watchsync_core::{BusValue, CloseReason, MethodCall, Signal, SignalMatch};

use crate::application::remote_bus::{
    BusConnector, BusError, MatchId, MethodError, ObjectHandler, RemoteBus, SignalSink,
};

#[derive(Default)]
struct MemoryState {
    calls: Vec<MethodCall>,
    signals: Vec<Signal>,
    matches: HashMap<MatchId, (SignalMatch, SignalSink)>,
    next_match_id: MatchId,
    names: BTreeSet<String>,
    objects: HashMap<String, Arc<dyn ObjectHandler>>,
    next_notification_id: u32,
    fail_calls: bool,
}

/// Recording loopback session.
pub struct MemoryBus {
    state: Mutex<MemoryState>,
    connected: AtomicBool,
    reconnects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MemoryBus {
    /// Creates a connected session with nothing recorded.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_match_id: 1,
                next_notification_id: 1,
                ..MemoryState::default()
            }),
            connected: AtomicBool::new(true),
            reconnects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Every method call received, in order.
    pub fn calls(&self) -> Vec<MethodCall> {
        self.lock().calls.clone()
    }

    /// Method calls whose member is `member`, in order.
    pub fn calls_to(&self, member: &str) -> Vec<MethodCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.member == member)
            .cloned()
            .collect()
    }

    /// Every signal emitted by the bridge, in order.
    pub fn signals(&self) -> Vec<Signal> {
        self.lock().signals.clone()
    }

    /// Returns and forgets the signals emitted so far.
    pub fn take_signals(&self) -> Vec<Signal> {
        std::mem::take(&mut self.lock().signals)
    }

    pub fn owned_names(&self) -> Vec<String> {
        self.lock().names.iter().cloned().collect()
    }

    pub fn exported_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock().objects.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn active_matches(&self) -> usize {
        self.lock().matches.len()
    }

    /// Makes every subsequent method call fail until reset.
    pub fn set_fail_calls(&self, fail: bool) {
        self.lock().fail_calls = fail;
    }

    // ── Playing the watch side ────────────────────────────────────────────────

    /// Delivers `signal` to every matching subscription.
    ///
    /// Returns the number of subscriptions that received it.
    pub fn inject_signal(&self, signal: Signal) -> usize {
        let state = self.lock();
        let mut delivered = 0;
        for (rule, sink) in state.matches.values() {
            if rule.matches(&signal) && sink.send(signal.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Calls a method on an object the bridge exported, as a remote client
    /// would.
    pub async fn call_exported(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<BusValue>,
    ) -> Result<Vec<BusValue>, MethodError> {
        let handler = self.lock().objects.get(path).cloned();
        match handler {
            Some(handler) => handler.handle_call(interface, member, args).await,
            None => Err(MethodError::UnknownMethod {
                interface: interface.to_string(),
                member: member.to_string(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn ensure_connected(&self) -> Result<(), BusError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BusError::Disconnected)
        }
    }

    /// Answers calls the way the watch's notification daemon does.
    fn answer(state: &mut MemoryState, call: &MethodCall) -> Vec<BusValue> {
        if call.path != NOTIFICATIONS_PATH || call.interface != NOTIFICATIONS_INTERFACE {
            return Vec::new();
        }
        match call.member.as_str() {
            "Notify" => {
                let replaces = call.args.get(1).and_then(BusValue::as_u32).unwrap_or(0);
                let id = if replaces != 0 {
                    replaces
                } else {
                    let id = state.next_notification_id;
                    state.next_notification_id += 1;
                    id
                };
                vec![BusValue::UInt32(id)]
            }
            "CloseNotification" => {
                if let Some(id) = call.args.first().and_then(BusValue::as_u32) {
                    let closed = NotificationClosed {
                        id,
                        reason: CloseReason::ClosedByCall,
                    }
                    .into_signal();
                    for (rule, sink) in state.matches.values() {
                        if rule.matches(&closed) {
                            let _ = sink.send(closed.clone());
                        }
                    }
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBus for MemoryBus {
    async fn call_method(&self, call: MethodCall) -> Result<Vec<BusValue>, BusError> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.calls.push(call.clone());
        if state.fail_calls {
            return Err(BusError::Call {
                call: call.to_string(),
                source: "injected failure".into(),
            });
        }
        debug!(%call, "loopback call");
        Ok(Self::answer(&mut state, &call))
    }

    async fn emit_signal(&self, signal: Signal) -> Result<(), BusError> {
        self.ensure_connected()?;
        debug!(%signal, "loopback signal");
        self.lock().signals.push(signal);
        Ok(())
    }

    async fn add_match(&self, rule: SignalMatch, sink: SignalSink) -> Result<MatchId, BusError> {
        self.ensure_connected()?;
        let mut state = self.lock();
        let id = state.next_match_id;
        state.next_match_id += 1;
        state.matches.insert(id, (rule, sink));
        Ok(id)
    }

    async fn remove_match(&self, id: MatchId) -> Result<(), BusError> {
        self.ensure_connected()?;
        self.lock().matches.remove(&id);
        Ok(())
    }

    async fn request_name(&self, name: &str) -> Result<(), BusError> {
        self.ensure_connected()?;
        self.lock().names.insert(name.to_string());
        Ok(())
    }

    async fn release_name(&self, name: &str) -> Result<(), BusError> {
        self.ensure_connected()?;
        self.lock().names.remove(name);
        Ok(())
    }

    async fn export_object(
        &self,
        path: &str,
        handler: Arc<dyn ObjectHandler>,
    ) -> Result<(), BusError> {
        self.ensure_connected()?;
        self.lock().objects.insert(path.to_string(), handler);
        Ok(())
    }

    async fn unexport_object(&self, path: &str) -> Result<(), BusError> {
        self.ensure_connected()?;
        self.lock().objects.remove(path);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BusError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        // A dropped session loses its subscriptions, names and objects.
        let mut state = self.lock();
        state.matches.clear();
        state.names.clear();
        state.objects.clear();
        Ok(())
    }
}

// ── Connector ─────────────────────────────────────────────────────────────────

/// Hands out one shared [`MemoryBus`] for every address.
pub struct MemoryConnector {
    bus: Arc<MemoryBus>,
    connect_delay: Duration,
    failures_left: AtomicUsize,
    connects: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(MemoryBus::new()),
            connect_delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Makes every connection attempt take at least `delay`.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Makes the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// The shared session, i.e. the simulated watch.
    pub fn bus(&self) -> Arc<MemoryBus> {
        Arc::clone(&self.bus)
    }

    /// Successful connection attempts so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Highest number of connection attempts that were in progress at once.
    pub fn max_concurrent_connects(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusConnector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn RemoteBus>, BusError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BusError::Connect {
                address: address.to_string(),
                source: "connection refused".into(),
            });
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        self.bus.connected.store(true, Ordering::SeqCst);
        let bus: Arc<dyn RemoteBus> = self.bus.clone();
        Ok(bus)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
