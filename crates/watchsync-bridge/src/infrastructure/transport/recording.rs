//! Recording device transport for unit testing.
//!
//! Every successful write is pushed into a `Mutex<Vec<...>>` so tests can
//! check exactly which bytes went to which characteristic, in order.
//!
//! # Usage in tests
//!
//! ```ignore
//! let transport = Arc::new(RecordingTransport::new());
//! let device = Device::new("watch", transport.clone(), hub);
//!
//! device.send(uuids::TIME_SET, &payload, uuids::TIME_SERVICE)?;
//!
//! assert_eq!(transport.sent(), vec![(uuids::TIME_SET, payload.to_vec())]);
//! ```
//!
//! Call `set_connected(false)` to make writes fail with
//! [`TransportError::NotConnected`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use watchsync_core::CharacteristicId;

use crate::application::device::{DeviceTransport, TransportError};

pub struct RecordingTransport {
    sent: Mutex<Vec<(CharacteristicId, Vec<u8>)>>,
    connected: AtomicBool,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every accepted write, in order.
    pub fn sent(&self) -> Vec<(CharacteristicId, Vec<u8>)> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl DeviceTransport for RecordingTransport {
    fn send(&self, characteristic: CharacteristicId, payload: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((characteristic, payload.to_vec()));
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use watchsync_core::uuids;

    use super::*;

    #[test]
    fn test_records_writes_in_order() {
        let transport = RecordingTransport::new();

        transport.send(uuids::TIME_SET, &[1, 2]).unwrap();
        transport.send(uuids::SLIRP_OUTGOING, &[3]).unwrap();

        assert_eq!(
            transport.sent(),
            vec![(uuids::TIME_SET, vec![1, 2]), (uuids::SLIRP_OUTGOING, vec![3])]
        );
    }

    #[test]
    fn test_disconnected_transport_rejects_writes() {
        let transport = RecordingTransport::new();
        transport.set_connected(false);

        let result = transport.send(uuids::TIME_SET, &[1]);

        assert_eq!(result, Err(TransportError::NotConnected));
        assert!(transport.sent().is_empty());
    }
}
