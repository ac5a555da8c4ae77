//! Serialized connection to the remote object bus.
//!
//! # Why an actor? (for beginners)
//!
//! Several producers want to talk to the watch at once: the notification
//! listener posts and removes notifications, the media session reports track
//! changes, and the device registry opens and closes the link.  If each of
//! them used the bus session directly, two of them could interleave writes
//! or race an open against a close.
//!
//! Instead, a [`ConnectionChannel`] owns the session and a single Tokio task
//! (the *worker*).  Producers push commands into an unbounded queue and
//! return immediately; the worker drains the queue one command at a time:
//!
//! ```text
//!   producers ──submit()──▶ [ Open | Run | Run | Close | Run ... ] ──▶ worker ──▶ RemoteBus
//! ```
//!
//! Because there is exactly one consumer, commands run in submission order
//! and never overlap, and no lock is needed around the bus handle itself.
//!
//! # Dropped work
//!
//! A unit of work submitted while the channel has no open session (never
//! opened, closed, or stopped) is dropped with a warning rather than queued
//! for later.  Errors and panics inside a unit of work are logged with a
//! command id and do not affect the commands after it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::remote_bus::{BusConnector, BusError, RemoteBus};

/// Live session handle passed to every unit of work.
pub type BusHandle = Arc<dyn RemoteBus>;

type ActionFuture = Pin<Box<dyn Future<Output = Result<(), BusError>> + Send>>;
type Action = Box<dyn FnOnce(BusHandle) -> ActionFuture + Send>;

/// Lifecycle state of the channel's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
}

/// Snapshot of the session state and the address it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ChannelState,
    pub address: Option<String>,
}

/// Errors reported synchronously by the channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connection channel '{0}' has been stopped")]
    Stopped(String),
}

enum Command {
    Open(String),
    Close,
    Run {
        id: u64,
        label: &'static str,
        action: Action,
    },
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

/// Exclusive, serialized connection to the remote bus.
pub struct ConnectionChannel {
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
    next_command_id: AtomicU64,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionChannel {
    /// Creates the channel and spawns its worker task.
    ///
    /// `connect_timeout` bounds each connection attempt made by `open`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        name: impl Into<String>,
        connector: Arc<dyn BusConnector>,
        connect_timeout: Duration,
    ) -> Self {
        let name = name.into();
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ChannelStatus {
            state: ChannelState::Closed,
            address: None,
        });

        let worker = Worker {
            name: name.clone(),
            connector,
            connect_timeout,
            bus: None,
            address: None,
            open: false,
            status: status_tx,
        };
        let handle = tokio::spawn(worker.run(receiver));

        Self {
            name,
            commands,
            status,
            next_command_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ChannelState {
        self.status.borrow().state
    }

    /// Address of the current or most recent session.
    pub fn address(&self) -> Option<String> {
        self.status.borrow().address.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Opens (or reconnects) the session to `address`.
    ///
    /// Queued behind any pending open, so attempts never run concurrently.
    pub fn open(&self, address: impl Into<String>) {
        self.enqueue("open", Command::Open(address.into()));
    }

    /// Closes the session.  Closing a closed channel is a no-op.
    pub fn close(&self) {
        self.enqueue("close", Command::Close);
    }

    /// Schedules `action` to run on the worker with the live session.
    ///
    /// Returns immediately.  `label` names the unit of work in log lines.
    pub fn submit<F, Fut>(&self, label: &'static str, action: F)
    where
        F: FnOnce(BusHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BusError>> + Send + 'static,
    {
        let id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        let action: Action = Box::new(move |bus| Box::pin(action(bus)));
        self.enqueue(label, Command::Run { id, label, action });
    }

    /// Like [`submit`](Self::submit), but the unit of work enters the queue
    /// only after at least `delay` has elapsed.
    pub fn submit_delayed<F, Fut>(&self, label: &'static str, delay: Duration, action: F)
    where
        F: FnOnce(BusHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BusError>> + Send + 'static,
    {
        if self.is_stopped() {
            warn!(channel = %self.name, label, "channel stopped; dropping delayed command");
            return;
        }
        let id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        let action: Action = Box::new(move |bus| Box::pin(action(bus)));
        let commands = self.commands.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if commands.send(Command::Run { id, label, action }).is_err() {
                warn!(channel = %name, label, "channel stopped; dropping delayed command");
            }
        });
    }

    /// Resolves once every unit of work submitted before this call has run.
    pub async fn flush(&self) -> Result<(), ChannelError> {
        if self.is_stopped() {
            return Err(ChannelError::Stopped(self.name.clone()));
        }
        let (done, finished) = oneshot::channel();
        self.commands
            .send(Command::Barrier(done))
            .map_err(|_| ChannelError::Stopped(self.name.clone()))?;
        finished
            .await
            .map_err(|_| ChannelError::Stopped(self.name.clone()))
    }

    /// Drains queued work, closes the session and stops the worker.
    ///
    /// Only the first call has any effect; the channel cannot be restarted.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!(channel = %self.name, "shutdown requested twice; ignoring");
            return;
        }
        let _ = self.commands.send(Command::Shutdown);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(channel = %self.name, "connection worker ended abnormally: {e}");
            }
        }
        info!(channel = %self.name, "connection channel stopped");
    }

    fn enqueue(&self, label: &'static str, command: Command) {
        if self.is_stopped() {
            warn!(channel = %self.name, label, "channel stopped; dropping command");
            return;
        }
        if self.commands.send(command).is_err() {
            warn!(channel = %self.name, label, "connection worker is gone; dropping command");
        }
    }
}

impl Drop for ConnectionChannel {
    fn drop(&mut self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

struct Worker {
    name: String,
    connector: Arc<dyn BusConnector>,
    connect_timeout: Duration,
    bus: Option<BusHandle>,
    address: Option<String>,
    open: bool,
    status: watch::Sender<ChannelStatus>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Open(address) => self.open(address).await,
                Command::Close => self.close().await,
                Command::Run { id, label, action } => self.execute(id, label, action).await,
                Command::Barrier(done) => {
                    let _ = done.send(());
                }
                Command::Shutdown => break,
            }
        }
        self.close().await;
        debug!(channel = %self.name, "connection worker exited");
    }

    async fn open(&mut self, address: String) {
        self.publish(ChannelState::Opening, Some(address.clone()));

        let reusable = match (&self.bus, &self.address) {
            (Some(bus), Some(current)) if *current == address => Some(Arc::clone(bus)),
            _ => None,
        };

        let attempt = async {
            match reusable {
                Some(bus) => {
                    info!(channel = %self.name, %address, "reconnecting remote bus");
                    bus.reconnect().await.map(|()| bus)
                }
                None => {
                    info!(channel = %self.name, %address, "connecting to remote bus");
                    self.connector.connect(&address).await
                }
            }
        };
        let result = match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(BusError::ConnectTimeout {
                address: address.clone(),
            }),
        };

        match result {
            Ok(bus) => {
                if let Some(previous) = self.bus.replace(Arc::clone(&bus)) {
                    if self.open && !same_session(&previous, &bus) {
                        if let Err(e) = previous.disconnect().await {
                            warn!(channel = %self.name, "failed to close replaced session: {e}");
                        }
                    }
                }
                self.address = Some(address.clone());
                self.open = true;
                self.publish(ChannelState::Open, Some(address.clone()));
                info!(channel = %self.name, %address, "remote bus connection open");
            }
            Err(e) => {
                self.open = false;
                self.publish(ChannelState::Closed, Some(address.clone()));
                error!(channel = %self.name, %address, "failed to open remote bus connection: {e}");
            }
        }
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.disconnect().await {
                warn!(channel = %self.name, "error while closing remote bus connection: {e}");
            }
        }
        self.publish(ChannelState::Closed, self.address.clone());
        info!(channel = %self.name, "remote bus connection closed");
    }

    async fn execute(&mut self, id: u64, label: &'static str, action: Action) {
        let bus = match (&self.bus, self.open) {
            (Some(bus), true) => Arc::clone(bus),
            (None, _) => {
                warn!(channel = %self.name, id, label, "remote bus not set up yet; dropping command");
                return;
            }
            (Some(_), false) => {
                warn!(channel = %self.name, id, label, "remote bus connection closed; dropping command");
                return;
            }
        };

        let started = Instant::now();
        debug!(channel = %self.name, id, label, "command start");
        let outcome = AssertUnwindSafe(async move { action(bus).await })
            .catch_unwind()
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => debug!(channel = %self.name, id, label, elapsed_ms, "command end"),
            Ok(Err(e)) => {
                error!(channel = %self.name, id, label, elapsed_ms, "command failed: {e}")
            }
            Err(panic) => error!(
                channel = %self.name,
                id,
                label,
                elapsed_ms,
                "command panicked: {}",
                panic_message(panic.as_ref())
            ),
        }
    }

    fn publish(&self, state: ChannelState, address: Option<String>) {
        self.status.send_replace(ChannelStatus { state, address });
    }
}

fn same_session(a: &BusHandle, b: &BusHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::infrastructure::remote_bus::memory::MemoryConnector;

    const ADDRESS: &str = "tcp:host=127.0.0.1,port=55556";

    fn channel_with(connector: &Arc<MemoryConnector>) -> ConnectionChannel {
        let connector: Arc<dyn BusConnector> = connector.clone();
        ConnectionChannel::new("test", connector, Duration::from_secs(5))
    }

    fn flag_action(flag: &Arc<AtomicBool>) -> impl FnOnce(BusHandle) -> futures_util::future::Ready<Result<(), BusError>> {
        let flag = Arc::clone(flag);
        move |_bus| {
            flag.store(true, Ordering::SeqCst);
            futures_util::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_submit_before_open_is_dropped() {
        // Arrange
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);
        let ran = Arc::new(AtomicBool::new(false));

        // Act
        channel.submit("probe", flag_action(&ran));
        channel.flush().await.unwrap();

        // Assert
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_submits_before_open_are_dropped_without_crash() {
        // Arrange
        let connector = Arc::new(MemoryConnector::new());
        let channel = Arc::new(channel_with(&connector));
        let ran = Arc::new(AtomicUsize::new(0));

        // Act: two producers race to submit
        let mut producers = Vec::new();
        for _ in 0..2 {
            let channel = Arc::clone(&channel);
            let ran = Arc::clone(&ran);
            producers.push(tokio::spawn(async move {
                channel.submit("race", move |_bus| async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), BusError>(())
                });
            }));
        }
        for p in producers {
            p.await.unwrap();
        }
        channel.flush().await.unwrap();

        // Assert
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_actions_run_in_fifo_order_without_overlap() {
        // Arrange
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);
        let order = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        channel.open(ADDRESS);

        // Act
        for i in 0..20 {
            let order = Arc::clone(&order);
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            channel.submit("ordered", move |_bus| async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                order.lock().unwrap().push(i);
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), BusError>(())
            });
        }
        channel.flush().await.unwrap();

        // Assert
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_after_open_runs_with_live_bus() {
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);
        let ran = Arc::new(AtomicBool::new(false));

        channel.open(ADDRESS);
        channel.submit("probe", flag_action(&ran));
        channel.flush().await.unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(channel.status().address.as_deref(), Some(ADDRESS));
    }

    #[tokio::test]
    async fn test_failing_and_panicking_actions_do_not_stop_worker() {
        // Arrange
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);
        let ran = Arc::new(AtomicBool::new(false));
        channel.open(ADDRESS);

        // Act
        channel.submit("fails", |_bus| async { Err::<(), _>(BusError::Disconnected) });
        channel.submit("panics", |_bus| async {
            let explode = true;
            if explode {
                panic!("boom");
            }
            Ok::<(), BusError>(())
        });
        channel.submit("after", flag_action(&ran));
        channel.flush().await.unwrap();

        // Assert
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_open_failure_leaves_channel_closed_and_retry_succeeds() {
        // Arrange
        let connector = Arc::new(MemoryConnector::new());
        connector.fail_next_connects(1);
        let channel = channel_with(&connector);
        let ran = Arc::new(AtomicBool::new(false));

        // Act: first open fails
        channel.open(ADDRESS);
        channel.submit("dropped", flag_action(&ran));
        channel.flush().await.unwrap();

        // Assert
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!ran.load(Ordering::SeqCst));

        // Act: explicit retry
        channel.open(ADDRESS);
        channel.submit("delivered", flag_action(&ran));
        channel.flush().await.unwrap();

        // Assert
        assert_eq!(channel.state(), ChannelState::Open);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_open_while_open_reconnects_instead_of_recreating() {
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);

        channel.open(ADDRESS);
        channel.open(ADDRESS);
        channel.flush().await.unwrap();

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.bus().reconnect_count(), 1);
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[tokio::test]
    async fn test_reopen_after_close_reuses_handle() {
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);

        channel.open(ADDRESS);
        channel.close();
        channel.open(ADDRESS);
        channel.flush().await.unwrap();

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.bus().reconnect_count(), 1);
        assert!(connector.bus().is_connected());
    }

    #[tokio::test]
    async fn test_open_attempts_never_overlap() {
        // Arrange: slow connects
        let connector = Arc::new(MemoryConnector::new().with_connect_delay(Duration::from_millis(5)));
        let channel = channel_with(&connector);

        // Act
        channel.open(ADDRESS);
        channel.open("tcp:host=10.0.0.2,port=55556");
        channel.open(ADDRESS);
        channel.flush().await.unwrap();

        // Assert
        assert_eq!(connector.max_concurrent_connects(), 1);
        assert_eq!(channel.status().address.as_deref(), Some(ADDRESS));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_safe_before_open() {
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);

        channel.close();
        channel.open(ADDRESS);
        channel.close();
        channel.close();
        channel.flush().await.unwrap();

        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(connector.bus().disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_close_is_dropped() {
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);
        let ran = Arc::new(AtomicBool::new(false));

        channel.open(ADDRESS);
        channel.close();
        channel.submit("late", flag_action(&ran));
        channel.flush().await.unwrap();

        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_delayed_waits_at_least_the_delay() {
        // Arrange
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);
        let ran = Arc::new(AtomicBool::new(false));
        channel.open(ADDRESS);
        channel.flush().await.unwrap();

        // Act
        channel.submit_delayed("later", Duration::from_millis(500), flag_action(&ran));
        tokio::time::sleep(Duration::from_millis(499)).await;
        channel.flush().await.unwrap();
        let early = ran.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        channel.flush().await.unwrap();

        // Assert
        assert!(!early);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker_once_and_drops_later_work() {
        // Arrange
        let connector = Arc::new(MemoryConnector::new());
        let channel = channel_with(&connector);
        let ran = Arc::new(AtomicBool::new(false));
        channel.open(ADDRESS);

        // Act
        channel.shutdown().await;
        channel.shutdown().await;
        channel.submit("late", flag_action(&ran));
        channel.open(ADDRESS);

        // Assert
        assert!(channel.is_stopped());
        assert_eq!(
            channel.flush().await,
            Err(ChannelError::Stopped("test".to_string()))
        );
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(connector.connect_count(), 1);
        assert!(!connector.bus().is_connected());
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let s: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(s.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
