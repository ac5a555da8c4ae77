//! Device registry: one paired watch and the modules multiplexed over its
//! single logical connection.
//!
//! # Responsibilities
//!
//! - **Service registration** – each module describes itself with a
//!   [`ServiceDescriptor`].  A characteristic may belong to only one
//!   registered service at a time.
//! - **Routing** – outbound bytes go to the transport only when the calling
//!   service owns the characteristic and it flows towards the device;
//!   inbound bytes are handed to the callback registered for their
//!   characteristic.
//! - **Lifecycle fan-out** – entering `Connected` calls `sync()` on every
//!   module (registration order), entering `Disconnected` calls `unsync()`
//!   (reverse order).  This is the only way modules learn about
//!   connectivity changes.
//!
//! The registry never awaits a module: `sync`/`unsync` must return quickly
//! and push their real work onto their own tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::{debug, info};
use watchsync_core::{CharacteristicId, ConnectionState, Direction, ServiceDescriptor, ServiceId};

use crate::application::event_hub::EventHub;

/// A functional module bound to the device lifecycle.
pub trait ConnectivityService: Send + Sync {
    fn descriptor(&self) -> &ServiceDescriptor;

    /// Called when the device becomes connected.  Must not block.
    fn sync(&self);

    /// Called when the device disconnects.  Must not block, and must be safe
    /// even if the matching `sync` never got to run its work.
    fn unsync(&self);
}

/// Outbound byte transport to the paired device (BLE GATT writes).
#[cfg_attr(test, mockall::automock)]
pub trait DeviceTransport: Send + Sync {
    fn send(&self, characteristic: CharacteristicId, payload: &[u8]) -> Result<(), TransportError>;
}

/// Errors from the device transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("device transport is not connected")]
    NotConnected,

    #[error("write to characteristic {characteristic} failed: {reason}")]
    WriteFailed {
        characteristic: CharacteristicId,
        reason: String,
    },
}

/// Routing and registration failures, reported synchronously.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no registered service owns characteristic {0}")]
    UnknownCharacteristic(CharacteristicId),

    #[error("characteristic {characteristic} belongs to service {owner}, not {caller}")]
    NotOwner {
        characteristic: CharacteristicId,
        owner: ServiceId,
        caller: ServiceId,
    },

    #[error("characteristic {0} only carries data from the device")]
    WrongDirection(CharacteristicId),

    #[error("characteristic {characteristic} is already owned by service {owner}")]
    CharacteristicConflict {
        characteristic: CharacteristicId,
        owner: ServiceId,
    },

    #[error("service {0} is not registered")]
    ServiceNotFound(ServiceId),

    #[error("service {0} is already registered")]
    DuplicateService(ServiceId),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Handler for inbound characteristic data.
pub type CharacteristicCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct LinkState {
    state: ConnectionState,
    /// Whether modules currently hold a `sync` without a matching `unsync`.
    synced: bool,
}

/// One physical paired device.
pub struct Device {
    name: String,
    hub: Arc<EventHub>,
    transport: Arc<dyn DeviceTransport>,
    link: Mutex<LinkState>,
    services: RwLock<Vec<Arc<dyn ConnectivityService>>>,
    callbacks: RwLock<HashMap<CharacteristicId, CharacteristicCallback>>,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn DeviceTransport>,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            name: name.into(),
            hub,
            transport,
            link: Mutex::new(LinkState {
                state: ConnectionState::Disconnected,
                synced: false,
            }),
            services: RwLock::new(Vec::new()),
            callbacks: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock_link().state
    }

    // ── Service registration ──────────────────────────────────────────────────

    /// Adds a module.  When the device is already connected the module is
    /// synced immediately.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateService`] if the service id is taken, or
    /// [`RegistryError::CharacteristicConflict`] if another service already
    /// owns one of its characteristics.
    pub fn register_service(
        &self,
        service: Arc<dyn ConnectivityService>,
    ) -> Result<(), RegistryError> {
        let link = self.lock_link();
        {
            let mut services = self.services.write().unwrap_or_else(|p| p.into_inner());
            let descriptor = service.descriptor();
            for existing in services.iter() {
                let existing = existing.descriptor();
                if existing.service_id() == descriptor.service_id() {
                    return Err(RegistryError::DuplicateService(descriptor.service_id()));
                }
                if let Some(characteristic) = existing.conflicting_characteristic(descriptor) {
                    return Err(RegistryError::CharacteristicConflict {
                        characteristic,
                        owner: existing.service_id(),
                    });
                }
            }
            services.push(Arc::clone(&service));
        }
        info!(
            device = %self.name,
            service = service.descriptor().name(),
            "registered connectivity service"
        );
        if link.synced {
            service.sync();
        }
        Ok(())
    }

    /// Removes a module, unsyncing it first if the device is connected.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ServiceNotFound`] if no such service is registered.
    pub fn unregister_service(
        &self,
        service_id: ServiceId,
    ) -> Result<Arc<dyn ConnectivityService>, RegistryError> {
        let link = self.lock_link();
        let removed = {
            let mut services = self.services.write().unwrap_or_else(|p| p.into_inner());
            let index = services
                .iter()
                .position(|s| s.descriptor().service_id() == service_id)
                .ok_or(RegistryError::ServiceNotFound(service_id))?;
            services.remove(index)
        };
        if link.synced {
            removed.unsync();
        }
        info!(
            device = %self.name,
            service = removed.descriptor().name(),
            "unregistered connectivity service"
        );
        Ok(removed)
    }

    /// Looks up a registered module by id.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ServiceNotFound`] if no such service is registered.
    pub fn service(&self, service_id: ServiceId) -> Result<Arc<dyn ConnectivityService>, RegistryError> {
        self.services
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|s| s.descriptor().service_id() == service_id)
            .cloned()
            .ok_or(RegistryError::ServiceNotFound(service_id))
    }

    /// Ids of all registered modules in registration order.
    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.services
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|s| s.descriptor().service_id())
            .collect()
    }

    // ── Characteristic callbacks ──────────────────────────────────────────────

    /// Binds `callback` to inbound data on `characteristic`.
    ///
    /// The first binding wins: returns `false` and leaves the existing
    /// callback in place if one is already registered.
    pub fn register_callback(
        &self,
        characteristic: CharacteristicId,
        callback: CharacteristicCallback,
    ) -> bool {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|p| p.into_inner());
        if callbacks.contains_key(&characteristic) {
            return false;
        }
        callbacks.insert(characteristic, callback);
        true
    }

    /// Removes the callback for `characteristic`; returns whether one existed.
    pub fn unregister_callback(&self, characteristic: CharacteristicId) -> bool {
        self.callbacks
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&characteristic)
            .is_some()
    }

    /// Delivers inbound data to the callback bound to `characteristic`.
    ///
    /// Returns `false` if nothing is bound.
    pub fn dispatch_inbound(&self, characteristic: CharacteristicId, data: &[u8]) -> bool {
        let callback = self
            .callbacks
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&characteristic)
            .cloned();
        match callback {
            Some(callback) => {
                callback(data);
                true
            }
            None => {
                debug!(device = %self.name, %characteristic, "no callback for inbound data");
                false
            }
        }
    }

    // ── Outbound routing ──────────────────────────────────────────────────────

    /// Sends `payload` on `characteristic` on behalf of `via_service`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownCharacteristic`] if no service owns it.
    /// - [`RegistryError::NotOwner`] if it belongs to a different service.
    /// - [`RegistryError::WrongDirection`] if it only flows from the device.
    /// - [`RegistryError::Transport`] if the write itself fails.
    pub fn send(
        &self,
        characteristic: CharacteristicId,
        payload: &[u8],
        via_service: ServiceId,
    ) -> Result<(), RegistryError> {
        let (owner, owner_name, direction) = {
            let services = self.services.read().unwrap_or_else(|p| p.into_inner());
            services
                .iter()
                .find_map(|s| {
                    let d = s.descriptor();
                    d.direction_of(&characteristic)
                        .map(|dir| (d.service_id(), d.name(), dir))
                })
                .ok_or(RegistryError::UnknownCharacteristic(characteristic))?
        };
        if owner != via_service {
            return Err(RegistryError::NotOwner {
                characteristic,
                owner,
                caller: via_service,
            });
        }
        if direction == Direction::FromDevice {
            return Err(RegistryError::WrongDirection(characteristic));
        }
        debug!(
            device = %self.name,
            service = owner_name,
            %characteristic,
            len = payload.len(),
            "sending to device"
        );
        self.transport.send(characteristic, payload)?;
        Ok(())
    }

    // ── Connection state ──────────────────────────────────────────────────────

    /// Moves the device to `next` and fans `sync`/`unsync` out to modules.
    ///
    /// Setting the current state again is a no-op.  `Connecting` never
    /// triggers fan-out.
    pub fn set_connection_state(&self, next: ConnectionState) {
        let mut link = self.lock_link();
        if link.state == next {
            return;
        }
        let previous = std::mem::replace(&mut link.state, next);
        info!(device = %self.name, from = %previous, to = %next, "connection state changed");
        self.hub.publish_connection_state(next);

        match next {
            ConnectionState::Connected if !link.synced => {
                link.synced = true;
                for service in self.snapshot_services() {
                    debug!(service = service.descriptor().name(), "sync");
                    service.sync();
                }
            }
            ConnectionState::Disconnected if link.synced => {
                link.synced = false;
                for service in self.snapshot_services().into_iter().rev() {
                    debug!(service = service.descriptor().name(), "unsync");
                    service.unsync();
                }
            }
            _ => {}
        }
    }

    fn snapshot_services(&self) -> Vec<Arc<dyn ConnectivityService>> {
        self.services
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
