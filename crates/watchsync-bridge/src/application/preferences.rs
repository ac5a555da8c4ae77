//! Per-app notification preferences capability.
//!
//! Storage lives in `infrastructure::storage`; the notification bridge only
//! sees this trait.

use watchsync_core::NotificationOption;

pub trait PreferenceStore: Send + Sync {
    /// The option configured for `package`, or [`NotificationOption::Default`].
    fn notification_option(&self, package: &str) -> NotificationOption;

    fn set_notification_option(&self, package: &str, option: NotificationOption);

    /// Remembers that `package` has posted at least once.
    fn mark_package_seen(&self, package: &str);

    /// Packages seen so far, sorted.
    fn seen_packages(&self) -> Vec<String>;
}
