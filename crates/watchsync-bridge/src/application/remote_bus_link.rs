//! Remote-bus link module: ties the connection channel to the device
//! lifecycle.
//!
//! Register it before the bridges that submit work on the channel.  Sync
//! fan-out runs in registration order and unsync in reverse, so the channel
//! is opened before anyone queues work on it and closed after everyone has
//! queued their teardown.

use std::sync::Arc;

use tracing::info;
use watchsync_core::{uuids, Direction, ServiceDescriptor};

use crate::application::connection_channel::ConnectionChannel;
use crate::application::device::ConnectivityService;

pub struct RemoteBusLink {
    descriptor: ServiceDescriptor,
    channel: Arc<ConnectionChannel>,
    address: String,
}

impl RemoteBusLink {
    pub fn new(channel: Arc<ConnectionChannel>, address: impl Into<String>) -> Self {
        Self {
            descriptor: ServiceDescriptor::new(uuids::SLIRP_SERVICE, "remote-bus-link")
                .with_characteristic(uuids::SLIRP_OUTGOING, Direction::ToDevice)
                .with_characteristic(uuids::SLIRP_INCOMING, Direction::FromDevice),
            channel,
            address: address.into(),
        }
    }

    pub fn channel(&self) -> &Arc<ConnectionChannel> {
        &self.channel
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl ConnectivityService for RemoteBusLink {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn sync(&self) {
        info!(address = %self.address, "opening remote bus link");
        self.channel.open(self.address.clone());
    }

    fn unsync(&self) {
        info!("closing remote bus link");
        self.channel.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
