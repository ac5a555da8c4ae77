//! In-memory preference store seeded from the `[notifications]` config
//! section.
//!
//! Changes made at runtime are kept in memory; call
//! [`InMemoryPreferences::write_to`] and save the config to persist them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;
use watchsync_core::NotificationOption;

use crate::application::preferences::PreferenceStore;
use crate::infrastructure::storage::config::NotificationsConfig;

#[derive(Default)]
struct PreferenceState {
    default_option: NotificationOption,
    apps: BTreeMap<String, NotificationOption>,
    seen: BTreeSet<String>,
}

#[derive(Default)]
pub struct InMemoryPreferences {
    state: Mutex<PreferenceState>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &NotificationsConfig) -> Self {
        Self {
            state: Mutex::new(PreferenceState {
                default_option: config.default_option,
                apps: config.apps.clone(),
                seen: BTreeSet::new(),
            }),
        }
    }

    /// Copies the per-app options back into `config`.
    pub fn write_to(&self, config: &mut NotificationsConfig) {
        let state = self.lock();
        config.default_option = state.default_option;
        config.apps = state.apps.clone();
    }

    fn lock(&self) -> MutexGuard<'_, PreferenceState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn notification_option(&self, package: &str) -> NotificationOption {
        let state = self.lock();
        state
            .apps
            .get(package)
            .copied()
            .unwrap_or(state.default_option)
    }

    fn set_notification_option(&self, package: &str, option: NotificationOption) {
        let mut state = self.lock();
        if option == NotificationOption::Default && !state.apps.contains_key(package) {
            return;
        }
        debug!(package, ?option, "notification option changed");
        state.apps.insert(package.to_string(), option);
    }

    fn mark_package_seen(&self, package: &str) {
        self.lock().seen.insert(package.to_string());
    }

    fn seen_packages(&self) -> Vec<String> {
        self.lock().seen.iter().cloned().collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_package_gets_configured_default() {
        // Arrange
        let config = NotificationsConfig {
            default_option: NotificationOption::Silent,
            ..NotificationsConfig::default()
        };
        let prefs = InMemoryPreferences::from_config(&config);

        // Act / Assert
        assert_eq!(prefs.notification_option("org.example.any"), NotificationOption::Silent);
    }

    #[test]
    fn test_explicit_option_overrides_default() {
        let prefs = InMemoryPreferences::new();

        prefs.set_notification_option("org.example.chat", NotificationOption::StrongVibration);

        assert_eq!(
            prefs.notification_option("org.example.chat"),
            NotificationOption::StrongVibration
        );
    }

    #[test]
    fn test_storing_default_without_entry_is_skipped() {
        // Arrange
        let prefs = InMemoryPreferences::new();
        let mut config = NotificationsConfig::default();

        // Act
        prefs.set_notification_option("org.example.chat", NotificationOption::Default);
        prefs.write_to(&mut config);

        // Assert
        assert!(config.apps.is_empty());
    }

    #[test]
    fn test_resetting_existing_entry_to_default_is_stored() {
        let prefs = InMemoryPreferences::new();
        prefs.set_notification_option("org.example.chat", NotificationOption::Silent);

        prefs.set_notification_option("org.example.chat", NotificationOption::Default);

        let mut config = NotificationsConfig::default();
        prefs.write_to(&mut config);
        assert_eq!(
            config.apps.get("org.example.chat"),
            Some(&NotificationOption::Default)
        );
    }

    #[test]
    fn test_seen_packages_are_sorted_and_unique() {
        let prefs = InMemoryPreferences::new();

        prefs.mark_package_seen("org.b");
        prefs.mark_package_seen("org.a");
        prefs.mark_package_seen("org.b");

        assert_eq!(prefs.seen_packages(), vec!["org.a".to_string(), "org.b".to_string()]);
    }
}
