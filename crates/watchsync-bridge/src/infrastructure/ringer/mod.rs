//! Phone ringer adapters.
//!
//! The platform audio service is outside this crate.  `InMemoryRinger`
//! holds the mode itself, logs every change, and records them for tests.

use std::sync::{Mutex, MutexGuard};

use tracing::info;

use crate::application::silent_mode::{RingerControl, RingerMode};

struct RingerState {
    mode: RingerMode,
    history: Vec<RingerMode>,
}

pub struct InMemoryRinger {
    state: Mutex<RingerState>,
}

impl InMemoryRinger {
    pub fn new(mode: RingerMode) -> Self {
        Self {
            state: Mutex::new(RingerState {
                mode,
                history: Vec::new(),
            }),
        }
    }

    /// Every mode set through [`RingerControl::set_ringer_mode`], in order.
    pub fn history(&self) -> Vec<RingerMode> {
        self.lock().history.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RingerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for InMemoryRinger {
    fn default() -> Self {
        Self::new(RingerMode::Normal)
    }
}

impl RingerControl for InMemoryRinger {
    fn ringer_mode(&self) -> RingerMode {
        self.lock().mode
    }

    fn set_ringer_mode(&self, mode: RingerMode) {
        let mut state = self.lock();
        info!(from = ?state.mode, to = ?mode, "ringer mode changed");
        state.mode = mode;
        state.history.push(mode);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
