//! Remote-bus value model and typed helpers for the surfaces the bridge
//! talks to: the watch's notification service and the media-control object
//! the bridge exports.

pub mod mpris;
pub mod names;
pub mod notifications;
pub mod value;

pub use notifications::{NotificationClosed, NotifyRequest};
pub use value::{BusType, BusValue, MethodCall, Signal, SignalMatch};
