//! Device connectivity entities: connection state, characteristic direction,
//! and the descriptor every connectivity service registers with.
//!
//! # Services and characteristics (for beginners)
//!
//! A paired watch exposes a handful of independent *services* (battery,
//! time, notifications, ...).  Each service owns one or more
//! *characteristics*: small addressable data channels that only ever carry
//! data in one direction.  A [`ServiceDescriptor`] records which
//! characteristics a module owns and which way each one flows, so the
//! device registry can route outbound bytes and reject sends to channels the
//! caller does not own.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a connectivity service (a GATT service UUID on the watch).
pub type ServiceId = Uuid;

/// Identifier of a single characteristic inside a service.
pub type CharacteristicId = Uuid;

/// Device-level connectivity as seen by every module.
///
/// Exactly one value is current at a time.  Only the device registry moves
/// between states; modules observe transitions through their `sync`/`unsync`
/// hooks or the event hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// The link is up and services have been synced.
    Connected,
    /// The transport is negotiating; no module has been synced yet.
    Connecting,
    /// No link.  This is the initial state.
    #[default]
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Transfer direction of a characteristic, from the phone's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Phone writes, watch reads.
    ToDevice,
    /// Watch notifies, phone reads.
    FromDevice,
}

/// Static description of one functional module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    service_id: ServiceId,
    name: &'static str,
    characteristics: HashMap<CharacteristicId, Direction>,
}

impl ServiceDescriptor {
    /// Creates a descriptor with no characteristics.
    ///
    /// Modules whose traffic rides the remote object bus rather than a
    /// dedicated characteristic (notifications, media) stay this way.
    pub fn new(service_id: ServiceId, name: &'static str) -> Self {
        Self {
            service_id,
            name,
            characteristics: HashMap::new(),
        }
    }

    /// Builder-style helper that adds one characteristic.
    pub fn with_characteristic(mut self, id: CharacteristicId, direction: Direction) -> Self {
        self.characteristics.insert(id, direction);
        self
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Short human-readable module name used in log lines.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn characteristics(&self) -> &HashMap<CharacteristicId, Direction> {
        &self.characteristics
    }

    /// Returns the direction of `id` if this service owns it.
    pub fn direction_of(&self, id: &CharacteristicId) -> Option<Direction> {
        self.characteristics.get(id).copied()
    }

    /// Returns the first characteristic that both descriptors claim, if any.
    pub fn conflicting_characteristic(&self, other: &ServiceDescriptor) -> Option<CharacteristicId> {
        self.characteristics
            .keys()
            .find(|id| other.characteristics.contains_key(id))
            .copied()
    }
}

/// Well-known service and characteristic identifiers advertised by the watch.
pub mod uuids {
    use uuid::Uuid;

    /// Advertisement filter shared by every companion-capable watch.
    pub const WATCH_FILTER: Uuid = Uuid::from_u128(0x00000000_0000_0000_0000_00A57E401D05);

    pub const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180F_0000_1000_8000_00805F9B34FB);
    pub const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002A19_0000_1000_8000_00805F9B34FB);

    pub const TIME_SERVICE: Uuid = Uuid::from_u128(0x00005071_0000_0000_0000_00A57E401D05);
    pub const TIME_SET: Uuid = Uuid::from_u128(0x00005001_0000_0000_0000_00A57E401D05);

    pub const MEDIA_SERVICE: Uuid = Uuid::from_u128(0x00007071_0000_0000_0000_00A57E401D05);

    pub const NOTIFICATION_SERVICE: Uuid = Uuid::from_u128(0x00009071_0000_0000_0000_00A57E401D05);

    /// Service carrying the tunnelled remote-bus traffic.
    pub const SLIRP_SERVICE: Uuid = Uuid::from_u128(0x0000A071_0000_0000_0000_00A57E401D05);
    pub const SLIRP_OUTGOING: Uuid = Uuid::from_u128(0x0000A001_0000_0000_0000_00A57E401D05);
    pub const SLIRP_INCOMING: Uuid = Uuid::from_u128(0x0000A002_0000_0000_0000_00A57E401D05);

    /// Registry key of the phone-side silent-mode module.  Not advertised
    /// by the watch and owns no characteristics.
    pub const SILENT_MODE_LOCAL: Uuid = Uuid::from_u128(0x0000B071_0000_0000_0000_000000000001);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_descriptor_reports_direction_of_owned_characteristic() {
        // Arrange
        let desc = ServiceDescriptor::new(uuids::SLIRP_SERVICE, "link")
            .with_characteristic(uuids::SLIRP_OUTGOING, Direction::ToDevice)
            .with_characteristic(uuids::SLIRP_INCOMING, Direction::FromDevice);

        // Act / Assert
        assert_eq!(desc.direction_of(&uuids::SLIRP_OUTGOING), Some(Direction::ToDevice));
        assert_eq!(desc.direction_of(&uuids::SLIRP_INCOMING), Some(Direction::FromDevice));
        assert_eq!(desc.direction_of(&uuids::TIME_SET), None);
    }

    #[test]
    fn test_conflicting_characteristic_detects_shared_channel() {
        let a = ServiceDescriptor::new(uuids::TIME_SERVICE, "time")
            .with_characteristic(uuids::TIME_SET, Direction::ToDevice);
        let b = ServiceDescriptor::new(uuids::BATTERY_SERVICE, "battery")
            .with_characteristic(uuids::TIME_SET, Direction::FromDevice);

        assert_eq!(a.conflicting_characteristic(&b), Some(uuids::TIME_SET));
    }

    #[test]
    fn test_disjoint_descriptors_do_not_conflict() {
        let a = ServiceDescriptor::new(uuids::TIME_SERVICE, "time")
            .with_characteristic(uuids::TIME_SET, Direction::ToDevice);
        let b = ServiceDescriptor::new(uuids::BATTERY_SERVICE, "battery")
            .with_characteristic(uuids::BATTERY_LEVEL, Direction::FromDevice);

        assert_eq!(a.conflicting_characteristic(&b), None);
    }

    #[test]
    fn test_well_known_uuid_text_form() {
        assert_eq!(
            uuids::NOTIFICATION_SERVICE.to_string(),
            "00009071-0000-0000-0000-00a57e401d05"
        );
        assert_eq!(
            uuids::BATTERY_LEVEL.to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }
}
