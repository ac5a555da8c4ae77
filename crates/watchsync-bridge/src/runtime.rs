//! Composition root: builds one device with every connectivity module
//! registered on it.
//!
//! Both `main.rs` and the integration tests go through [`BridgeRuntime`], so
//! they wire modules in the same order:
//!
//! ```text
//!   1. remote-bus link   (opens the channel first, closes it last)
//!   2. notifications
//!   3. media
//!   4. battery
//!   5. time
//!   6. silent mode
//! ```

use std::sync::Arc;

use tracing::info;
use watchsync_core::ConnectionState;

use crate::application::battery::BatteryMonitor;
use crate::application::connection_channel::ConnectionChannel;
use crate::application::device::{Device, DeviceTransport, RegistryError};
use crate::application::event_hub::EventHub;
use crate::application::media_bridge::MediaBridge;
use crate::application::notification_bridge::NotificationBridge;
use crate::application::remote_bus::BusConnector;
use crate::application::remote_bus_link::RemoteBusLink;
use crate::application::silent_mode::{RingerControl, SilentMode};
use crate::application::time_sync::TimeSync;
use crate::infrastructure::storage::config::BridgeConfig;
use crate::infrastructure::storage::preferences::InMemoryPreferences;

pub struct BridgeRuntime {
    pub hub: Arc<EventHub>,
    pub device: Arc<Device>,
    pub channel: Arc<ConnectionChannel>,
    pub notifications: Arc<NotificationBridge>,
    pub media: Arc<MediaBridge>,
    pub preferences: Arc<InMemoryPreferences>,
    pub silent_mode: Arc<SilentMode>,
}

impl BridgeRuntime {
    /// Builds the device and registers all modules.  Must be called inside
    /// a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if two modules claim the same service or
    /// characteristic.
    pub fn build(
        config: &BridgeConfig,
        connector: Arc<dyn BusConnector>,
        transport: Arc<dyn DeviceTransport>,
        ringer: Arc<dyn RingerControl>,
    ) -> Result<Self, RegistryError> {
        let hub = Arc::new(EventHub::new());
        let device = Arc::new(Device::new("watch", transport, Arc::clone(&hub)));
        let channel = Arc::new(ConnectionChannel::new(
            "remote-bus",
            connector,
            config.remote_bus.connect_timeout(),
        ));
        let preferences = Arc::new(InMemoryPreferences::from_config(&config.notifications));

        let link = Arc::new(RemoteBusLink::new(
            Arc::clone(&channel),
            config.remote_bus.address.clone(),
        ));
        let notifications = Arc::new(NotificationBridge::new(
            Arc::clone(&channel),
            Arc::clone(&hub),
            preferences.clone(),
        ));
        let media = Arc::new(MediaBridge::new(
            Arc::clone(&channel),
            Arc::clone(&hub),
            config.media.to_settings(),
        ));
        let battery = Arc::new(BatteryMonitor::new(Arc::downgrade(&device), Arc::clone(&hub)));
        let time = Arc::new(TimeSync::new(
            Arc::downgrade(&device),
            Arc::clone(&hub),
            config.time.to_settings(),
        ));
        let silent_mode = Arc::new(SilentMode::new(ringer, config.silent_mode.enabled));

        device.register_service(link)?;
        device.register_service(notifications.clone())?;
        device.register_service(media.clone())?;
        device.register_service(battery)?;
        device.register_service(time)?;
        device.register_service(silent_mode.clone())?;

        Ok(Self {
            hub,
            device,
            channel,
            notifications,
            media,
            preferences,
            silent_mode,
        })
    }

    /// Disconnects the device, lets the teardown work drain, and stops the
    /// channel worker.
    pub async fn shutdown(&self) {
        self.device.set_connection_state(ConnectionState::Disconnected);
        if let Err(e) = self.channel.flush().await {
            info!(error = %e, "channel already stopped");
        }
        self.channel.shutdown().await;
    }
}
