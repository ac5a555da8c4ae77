//! Time sync module: keeps the watch clock in step with the phone.
//!
//! # Wire format
//!
//! Six bytes written to the time-set characteristic:
//!
//! ```text
//!   [year - 1900, month (0-11), day (1-31), hour, minute, second]
//! ```
//!
//! The watch has no notion of time zones, so the bytes carry the phone's
//! local wall-clock time.  An optional fixed UTC offset overrides the
//! system zone.
//!
//! # When the time is written
//!
//! - 500 ms after each connect;
//! - once a day while connected;
//! - whenever a [`TimeSyncReason`] arrives on the hub (clock or zone change,
//!   explicit request).

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, Local, TimeZone, Timelike, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use watchsync_core::{uuids, Direction, ServiceDescriptor};

use crate::application::device::{ConnectivityService, Device, RegistryError};
use crate::application::event_hub::{EventHub, TimeSyncReason};

/// Delay between `sync` and the first write, giving the link time to settle.
pub const SYNC_DELAY: Duration = Duration::from_millis(500);

/// Period of the background re-sync while connected.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Current wall-clock time in the zone the watch should display.
pub type Clock = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncSettings {
    pub enabled: bool,
    /// Fixed offset from UTC in minutes; `None` follows the system zone.
    pub utc_offset_minutes: Option<i32>,
}

impl Default for TimeSyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            utc_offset_minutes: None,
        }
    }
}

impl TimeSyncSettings {
    /// Clock for these settings.  An out-of-range override falls back to
    /// the system zone.
    pub fn clock(&self) -> Clock {
        if let Some(minutes) = self.utc_offset_minutes {
            match minutes.checked_mul(60).and_then(FixedOffset::east_opt) {
                Some(offset) => return Arc::new(move || Utc::now().with_timezone(&offset)),
                None => warn!(minutes, "UTC offset out of range; using the system time zone"),
            }
        }
        Arc::new(|| Local::now().fixed_offset())
    }
}

pub struct TimeSync {
    descriptor: ServiceDescriptor,
    device: Weak<Device>,
    hub: Arc<EventHub>,
    settings: TimeSyncSettings,
    clock: Clock,
    pending: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimeSync {
    pub fn new(device: Weak<Device>, hub: Arc<EventHub>, settings: TimeSyncSettings) -> Self {
        Self {
            descriptor: ServiceDescriptor::new(uuids::TIME_SERVICE, "time")
                .with_characteristic(uuids::TIME_SET, Direction::ToDevice),
            device,
            hub,
            clock: settings.clock(),
            settings,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Replaces the wall clock; used by tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Writes the current time to the watch now.
    ///
    /// Does nothing when time sync is disabled or the device is gone.
    pub fn update_time(&self) -> Result<(), RegistryError> {
        if !self.settings.enabled {
            return Ok(());
        }
        push_time(&self.device, &self.clock)
    }
}

fn push_time(device: &Weak<Device>, clock: &Clock) -> Result<(), RegistryError> {
    let Some(device) = device.upgrade() else {
        return Ok(());
    };
    let payload = encode_time(&clock());
    debug!(?payload, "setting watch time");
    device.send(uuids::TIME_SET, &payload, uuids::TIME_SERVICE)
}

fn write_time(device: &Weak<Device>, clock: &Clock, trigger: &str) {
    match push_time(device, clock) {
        Ok(()) => info!(trigger, "watch time updated"),
        Err(e) => warn!(trigger, error = %e, "failed to set watch time"),
    }
}

/// Encodes the wall-clock fields of `now` into the six-byte time-set
/// payload.
pub fn encode_time<Tz: TimeZone>(now: &DateTime<Tz>) -> [u8; 6] {
    [
        (now.year() - 1900) as u8,
        now.month0() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    ]
}

/// Writes the time after [`SYNC_DELAY`], then again on every daily tick and
/// every hub request, until aborted.
async fn keep_in_sync(
    device: Weak<Device>,
    clock: Clock,
    mut requests: broadcast::Receiver<TimeSyncReason>,
) {
    tokio::time::sleep(SYNC_DELAY).await;
    write_time(&device, &clock, "connected");

    let mut daily = tokio::time::interval_at(Instant::now() + RESYNC_INTERVAL, RESYNC_INTERVAL);
    daily.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = daily.tick() => write_time(&device, &clock, "daily"),
            request = requests.recv() => match request {
                Ok(reason) => {
                    debug!(?reason, "time sync requested");
                    write_time(&device, &clock, "requested");
                }
                Err(RecvError::Lagged(_)) => write_time(&device, &clock, "requested"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

impl ConnectivityService for TimeSync {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn sync(&self) {
        if !self.settings.enabled {
            debug!("time sync disabled");
            return;
        }
        // Subscribe before spawning so requests raised right after connect
        // are not missed.
        let requests = self.hub.subscribe_time_sync();
        let task = tokio::spawn(keep_in_sync(
            self.device.clone(),
            Arc::clone(&self.clock),
            requests,
        ));
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn unsync(&self) {
        if let Some(task) = self.pending.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use watchsync_core::ConnectionState;

    use super::*;
    use crate::infrastructure::transport::RecordingTransport;

    const NOV_14_2023_BYTES: [u8; 6] = [123, 10, 14, 22, 13, 20];

    fn nov_14_2023() -> DateTime<FixedOffset> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap().fixed_offset()
    }

    struct Fixture {
        device: Arc<Device>,
        hub: Arc<EventHub>,
        transport: Arc<RecordingTransport>,
        time: Arc<TimeSync>,
    }

    fn fixture(settings: TimeSyncSettings) -> Fixture {
        let transport = Arc::new(RecordingTransport::new());
        let hub = Arc::new(EventHub::new());
        let device = Arc::new(Device::new("watch", transport.clone(), Arc::clone(&hub)));
        let time = Arc::new(
            TimeSync::new(Arc::downgrade(&device), Arc::clone(&hub), settings)
                .with_clock(Arc::new(nov_14_2023)),
        );
        device.register_service(time.clone()).unwrap();
        Fixture {
            device,
            hub,
            transport,
            time,
        }
    }

    #[test]
    fn test_encode_time_known_instant() {
        assert_eq!(encode_time(&nov_14_2023()), NOV_14_2023_BYTES);
        assert_eq!(
            encode_time(&Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap()),
            [70, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_encode_time_uses_local_fields_of_the_zone() {
        // 2024-07-01 12:00 UTC is 14:00 in Central European Summer Time
        let cest = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap().with_timezone(&cest);

        assert_eq!(encode_time(&now), [124, 6, 1, 14, 0, 0]);
    }

    #[test]
    fn test_encode_time_crosses_midnight_and_leap_day() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            encode_time(&nov_14_2023().with_timezone(&plus_two)),
            [123, 10, 15, 0, 13, 20]
        );
        assert_eq!(
            encode_time(&Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()),
            [124, 1, 29, 12, 0, 0]
        );
    }

    #[test]
    fn test_offset_override_selects_a_fixed_zone() {
        // Arrange
        let settings = TimeSyncSettings {
            enabled: true,
            utc_offset_minutes: Some(-300),
        };

        // Act
        let now = (settings.clock())();

        // Assert
        assert_eq!(now.offset().local_minus_utc(), -300 * 60);
    }

    #[test]
    fn test_out_of_range_override_follows_system_zone() {
        let settings = TimeSyncSettings {
            enabled: true,
            utc_offset_minutes: Some(100_000),
        };

        let now = (settings.clock())();

        assert!(now.offset().local_minus_utc().abs() < 24 * 3600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_writes_time_after_delay() {
        // Arrange
        let f = fixture(TimeSyncSettings::default());

        // Act
        f.device.set_connection_state(ConnectionState::Connected);
        tokio::task::yield_now().await;
        let before_delay = f.transport.sent().len();
        tokio::time::sleep(SYNC_DELAY + Duration::from_millis(10)).await;

        // Assert
        assert_eq!(before_delay, 0);
        assert_eq!(f.transport.sent(), vec![(uuids::TIME_SET, NOV_14_2023_BYTES.to_vec())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_is_rewritten_once_a_day_while_connected() {
        // Arrange
        let f = fixture(TimeSyncSettings::default());
        f.device.set_connection_state(ConnectionState::Connected);
        tokio::time::sleep(SYNC_DELAY + Duration::from_millis(10)).await;

        // Act
        tokio::time::sleep(RESYNC_INTERVAL).await;
        let after_one_day = f.transport.sent().len();
        tokio::time::sleep(RESYNC_INTERVAL).await;

        // Assert
        assert_eq!(after_one_day, 2);
        assert_eq!(f.transport.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_request_rewrites_time() {
        // Arrange
        let f = fixture(TimeSyncSettings::default());
        f.device.set_connection_state(ConnectionState::Connected);
        tokio::time::sleep(SYNC_DELAY + Duration::from_millis(10)).await;

        // Act
        f.hub.request_time_sync(TimeSyncReason::TimeZoneChanged);
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Assert
        assert_eq!(f.transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_every_resync() {
        // Arrange
        let f = fixture(TimeSyncSettings::default());
        f.device.set_connection_state(ConnectionState::Connected);
        tokio::time::sleep(SYNC_DELAY + Duration::from_millis(10)).await;

        // Act
        f.device.set_connection_state(ConnectionState::Disconnected);
        f.hub.request_time_sync(TimeSyncReason::ClockChanged);
        tokio::time::sleep(RESYNC_INTERVAL * 2).await;

        // Assert
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_before_delay_cancels_write() {
        let f = fixture(TimeSyncSettings::default());

        f.device.set_connection_state(ConnectionState::Connected);
        f.device.set_connection_state(ConnectionState::Disconnected);
        tokio::time::sleep(SYNC_DELAY * 2).await;

        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_sync_sends_nothing() {
        let settings = TimeSyncSettings {
            enabled: false,
            ..TimeSyncSettings::default()
        };
        let f = fixture(settings);

        f.device.set_connection_state(ConnectionState::Connected);
        f.hub.request_time_sync(TimeSyncReason::Requested);
        tokio::time::sleep(SYNC_DELAY * 2).await;
        f.time.update_time().unwrap();

        assert!(f.transport.sent().is_empty());
    }
}
