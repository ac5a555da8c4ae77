//! Device transports.
//!
//! The BLE GATT stack is outside this crate.  What ships here:
//!
//! - **`recording`** – `RecordingTransport`, which keeps every write in
//!   memory for test assertions.
//! - **`LoggingTransport`** – used by the binary when no real transport is
//!   attached; it logs each write and drops it.

pub mod recording;

pub use recording::RecordingTransport;

use tracing::info;
use watchsync_core::CharacteristicId;

use crate::application::device::{DeviceTransport, TransportError};

/// Transport that logs outbound writes instead of sending them.
#[derive(Debug, Default)]
pub struct LoggingTransport;

impl DeviceTransport for LoggingTransport {
    fn send(&self, characteristic: CharacteristicId, payload: &[u8]) -> Result<(), TransportError> {
        info!(%characteristic, ?payload, "device write (no transport attached)");
        Ok(())
    }
}
