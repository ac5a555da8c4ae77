//! Scriptable media session for unit testing.
//!
//! `FakeMediaController` holds a [`PlayerSnapshot`] that tests replace at
//! will, records every [`PlayerRequest`] forwarded to it, and lets tests fire
//! [`SessionEvent`]s as if the player app had changed state.
//!
//! # Usage in tests
//!
//! ```ignore
//! let player = Arc::new(FakeMediaController::new(snapshot));
//! bridge.bind_session(player.clone()).await;
//!
//! player.set_snapshot(paused);
//! player.emit(SessionEvent::PlayStateChanged);
//! player.settle().await;
//!
//! assert_eq!(player.requests(), vec![PlayerRequest::Pause]);
//! ```
//!
//! Requests are only recorded; the snapshot does not change in response, so
//! assertions stay independent of player semantics.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use watchsync_core::PlayerSnapshot;

use crate::application::media_session::{MediaController, PlayerRequest, SessionEvent};

const EVENT_CAPACITY: usize = 64;

/// How long [`FakeMediaController::settle`] lets listeners run.
const SETTLE_TIME: Duration = Duration::from_millis(20);

pub struct FakeMediaController {
    package_name: String,
    snapshot: Mutex<PlayerSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    requests: Mutex<Vec<PlayerRequest>>,
    /// Artificial latency of every snapshot read.
    delay: Duration,
}

impl FakeMediaController {
    pub fn new(snapshot: PlayerSnapshot) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            package_name: snapshot.package_name.clone(),
            snapshot: Mutex::new(snapshot),
            events,
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Makes every snapshot read take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_snapshot(&self, snapshot: PlayerSnapshot) {
        *self.snapshot.lock().unwrap_or_else(|p| p.into_inner()) = snapshot;
    }

    /// Fires `event` to every subscriber.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Gives spawned listeners time to react to emitted events.
    pub async fn settle(&self) {
        tokio::time::sleep(SETTLE_TIME).await;
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<PlayerRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl MediaController for FakeMediaController {
    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn snapshot(&self) -> PlayerSnapshot {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.snapshot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn execute(&self, request: PlayerRequest) {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_requests_and_serves_snapshot() {
        let player = FakeMediaController::new(PlayerSnapshot::idle("org.example.player"));
        let mut events = player.events();

        player.execute(PlayerRequest::Play).await;
        player.emit(SessionEvent::TrackChanged);

        assert_eq!(player.requests(), vec![PlayerRequest::Play]);
        assert_eq!(player.snapshot().await.package_name, "org.example.player");
        assert_eq!(events.recv().await.unwrap(), SessionEvent::TrackChanged);
    }
}
