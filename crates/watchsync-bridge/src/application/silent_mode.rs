//! Silent mode: mutes the phone's ringer while the watch is connected.
//!
//! When enabled, `sync` remembers the current ringer mode and switches the
//! phone to silent; `unsync` puts the remembered mode back.  The watch
//! vibrates for every mirrored notification, so the phone stays quiet.
//!
//! Toggling the preference while connected takes effect immediately:
//! enabling silences the phone, disabling restores the remembered mode.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};
use watchsync_core::{uuids, ServiceDescriptor};

use crate::application::device::ConnectivityService;

/// Phone ringer modes, quietest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingerMode {
    Silent,
    Vibrate,
    Normal,
}

/// Access to the phone's ringer.
#[cfg_attr(test, mockall::automock)]
pub trait RingerControl: Send + Sync {
    fn ringer_mode(&self) -> RingerMode;
    fn set_ringer_mode(&self, mode: RingerMode);
}

#[derive(Debug, Default)]
struct SilentState {
    enabled: bool,
    connected: bool,
    /// Mode to restore, captured when the phone was silenced.
    original: Option<RingerMode>,
}

pub struct SilentMode {
    descriptor: ServiceDescriptor,
    ringer: Arc<dyn RingerControl>,
    state: Mutex<SilentState>,
}

impl SilentMode {
    pub fn new(ringer: Arc<dyn RingerControl>, enabled: bool) -> Self {
        Self {
            descriptor: ServiceDescriptor::new(uuids::SILENT_MODE_LOCAL, "silent-mode"),
            ringer,
            state: Mutex::new(SilentState {
                enabled,
                ..SilentState::default()
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock_state().enabled
    }

    /// Updates the preference.  While connected the ringer follows at once.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.lock_state();
        if state.enabled == enabled {
            return;
        }
        state.enabled = enabled;
        if !state.connected {
            return;
        }
        if enabled {
            self.silence(&mut state);
        } else {
            self.restore(&mut state);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SilentState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn silence(&self, state: &mut SilentState) {
        let current = self.ringer.ringer_mode();
        if state.original.is_none() {
            state.original = Some(current);
        }
        if current != RingerMode::Silent {
            self.ringer.set_ringer_mode(RingerMode::Silent);
        }
        info!(previous = ?current, "phone ringer silenced");
    }

    fn restore(&self, state: &mut SilentState) {
        let Some(original) = state.original.take() else {
            debug!("no ringer mode to restore");
            return;
        };
        self.ringer.set_ringer_mode(original);
        info!(mode = ?original, "phone ringer restored");
    }
}

impl ConnectivityService for SilentMode {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn sync(&self) {
        let mut state = self.lock_state();
        state.connected = true;
        if state.enabled {
            self.silence(&mut state);
        }
    }

    fn unsync(&self) {
        let mut state = self.lock_state();
        state.connected = false;
        if state.enabled {
            self.restore(&mut state);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
