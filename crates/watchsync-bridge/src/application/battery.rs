//! Battery monitor: publishes the watch's battery percentage on the hub.
//!
//! The watch notifies on the standard battery-level characteristic; the
//! first byte of each notification is the percentage.

use std::sync::{Arc, Weak};

use tracing::{debug, warn};
use watchsync_core::{uuids, Direction, ServiceDescriptor};

use crate::application::device::{ConnectivityService, Device};
use crate::application::event_hub::EventHub;

pub struct BatteryMonitor {
    descriptor: ServiceDescriptor,
    device: Weak<Device>,
    hub: Arc<EventHub>,
}

impl BatteryMonitor {
    /// `device` is weak because the device owns its registered modules.
    pub fn new(device: Weak<Device>, hub: Arc<EventHub>) -> Self {
        Self {
            descriptor: ServiceDescriptor::new(uuids::BATTERY_SERVICE, "battery")
                .with_characteristic(uuids::BATTERY_LEVEL, Direction::FromDevice),
            device,
            hub,
        }
    }

    /// Last reported percentage, `None` while disconnected.
    pub fn level(&self) -> Option<u8> {
        self.hub.battery_level()
    }
}

/// Percentage carried by a battery-level notification.
pub fn parse_battery_level(data: &[u8]) -> Option<u8> {
    data.first().map(|level| (*level).min(100))
}

impl ConnectivityService for BatteryMonitor {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn sync(&self) {
        let Some(device) = self.device.upgrade() else {
            return;
        };
        let hub = Arc::clone(&self.hub);
        let registered = device.register_callback(
            uuids::BATTERY_LEVEL,
            Arc::new(move |data: &[u8]| match parse_battery_level(data) {
                Some(level) => {
                    debug!(level, "battery level");
                    hub.publish_battery_level(Some(level));
                }
                None => debug!("empty battery notification"),
            }),
        );
        if !registered {
            warn!("battery-level characteristic already has a callback");
        }
    }

    fn unsync(&self) {
        if let Some(device) = self.device.upgrade() {
            device.unregister_callback(uuids::BATTERY_LEVEL);
        }
        self.hub.publish_battery_level(None);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use watchsync_core::ConnectionState;

    use super::*;
    use crate::infrastructure::transport::RecordingTransport;

    fn device_with_monitor() -> (Arc<Device>, Arc<EventHub>, Arc<BatteryMonitor>) {
        let hub = Arc::new(EventHub::new());
        let device = Arc::new(Device::new(
            "watch",
            Arc::new(RecordingTransport::new()),
            Arc::clone(&hub),
        ));
        let monitor = Arc::new(BatteryMonitor::new(Arc::downgrade(&device), Arc::clone(&hub)));
        device.register_service(monitor.clone()).unwrap();
        (device, hub, monitor)
    }

    #[test]
    fn test_parse_battery_level_clamps_to_100() {
        assert_eq!(parse_battery_level(&[80]), Some(80));
        assert_eq!(parse_battery_level(&[200, 1]), Some(100));
        assert_eq!(parse_battery_level(&[]), None);
    }

    #[test]
    fn test_inbound_level_is_published_while_connected() {
        // Arrange
        let (device, hub, monitor) = device_with_monitor();
        device.set_connection_state(ConnectionState::Connected);

        // Act
        let delivered = device.dispatch_inbound(uuids::BATTERY_LEVEL, &[42]);

        // Assert
        assert!(delivered);
        assert_eq!(monitor.level(), Some(42));
        assert_eq!(hub.battery_level(), Some(42));
    }

    #[test]
    fn test_disconnect_clears_level_and_callback() {
        // Arrange
        let (device, hub, _monitor) = device_with_monitor();
        device.set_connection_state(ConnectionState::Connected);
        device.dispatch_inbound(uuids::BATTERY_LEVEL, &[42]);

        // Act
        device.set_connection_state(ConnectionState::Disconnected);

        // Assert
        assert_eq!(hub.battery_level(), None);
        assert!(!device.dispatch_inbound(uuids::BATTERY_LEVEL, &[50]));
    }
}
