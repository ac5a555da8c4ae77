//! Capability traits for the remote object bus.
//!
//! The application layer only ever sees these traits.  The zbus adapter and
//! the in-memory loopback bus in `infrastructure::remote_bus` implement them,
//! exactly as the platform input emulators implement a single trait for the
//! use cases that drive them.
//!
//! Nothing outside a [`ConnectionChannel`](super::connection_channel::ConnectionChannel)
//! worker may call a [`RemoteBus`] method: every call is funnelled through
//! `submit` so that only one unit of work touches the session at a time.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use watchsync_core::{BusValue, MethodCall, Signal, SignalMatch};

/// Boxed source error carried by [`BusError`] variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Identifier returned by [`RemoteBus::add_match`].
pub type MatchId = u64;

/// Receiving end of a signal subscription.
pub type SignalSink = mpsc::UnboundedSender<Signal>;

/// Failures of the remote bus itself.
#[derive(Debug, Error)]
pub enum BusError {
    /// Establishing (or re-establishing) the connection failed.
    #[error("failed to connect to remote bus at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: BoxError,
    },

    /// The connection attempt did not finish within the configured timeout.
    #[error("timed out connecting to remote bus at {address}")]
    ConnectTimeout { address: String },

    /// The handle exists but its connection has been closed.
    #[error("remote bus connection is closed")]
    Disconnected,

    /// A method call or signal emission failed.
    #[error("remote call {call} failed: {source}")]
    Call {
        call: String,
        #[source]
        source: BoxError,
    },

    /// A reply arrived but did not have the expected shape.
    #[error("unexpected reply to {call}")]
    UnexpectedReply { call: String },

    /// Exporting or unexporting an object failed.
    #[error("failed to export object at {path}: {source}")]
    Export {
        path: String,
        #[source]
        source: BoxError,
    },

    /// Claiming or releasing a well-known name failed.
    #[error("bus name operation on {name} failed: {source}")]
    Name {
        name: String,
        #[source]
        source: BoxError,
    },
}

/// Error returned to a remote caller of an exported object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MethodError {
    #[error("unknown method {interface}.{member}")]
    UnknownMethod { interface: String, member: String },

    #[error("unknown property {interface}.{name}")]
    UnknownProperty { interface: String, name: String },

    #[error("property {0} is read-only")]
    ReadOnlyProperty(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

impl MethodError {
    /// Standard D-Bus error name for the reply.
    pub fn error_name(&self) -> &'static str {
        match self {
            Self::UnknownMethod { .. } => "org.freedesktop.DBus.Error.UnknownMethod",
            Self::UnknownProperty { .. } => "org.freedesktop.DBus.Error.UnknownProperty",
            Self::ReadOnlyProperty(_) => "org.freedesktop.DBus.Error.PropertyReadOnly",
            Self::InvalidArgs(_) => "org.freedesktop.DBus.Error.InvalidArgs",
        }
    }
}

/// An object exported on the bus.
///
/// Handlers run on the transport's dispatch context, never on the
/// connection worker, so they may await the native session.
#[async_trait]
pub trait ObjectHandler: Send + Sync {
    async fn handle_call(
        &self,
        interface: &str,
        member: &str,
        args: Vec<BusValue>,
    ) -> Result<Vec<BusValue>, MethodError>;
}

/// One live session on the remote object bus.
#[async_trait]
pub trait RemoteBus: Send + Sync {
    /// Sends a method call and waits for its reply body.
    async fn call_method(&self, call: MethodCall) -> Result<Vec<BusValue>, BusError>;

    async fn emit_signal(&self, signal: Signal) -> Result<(), BusError>;

    /// Forwards every signal matching `rule` into `sink` until removed.
    async fn add_match(&self, rule: SignalMatch, sink: SignalSink) -> Result<MatchId, BusError>;

    async fn remove_match(&self, id: MatchId) -> Result<(), BusError>;

    async fn request_name(&self, name: &str) -> Result<(), BusError>;

    async fn release_name(&self, name: &str) -> Result<(), BusError>;

    async fn export_object(&self, path: &str, handler: Arc<dyn ObjectHandler>)
        -> Result<(), BusError>;

    async fn unexport_object(&self, path: &str) -> Result<(), BusError>;

    /// Re-establishes the session behind this handle.
    async fn reconnect(&self) -> Result<(), BusError>;

    async fn disconnect(&self) -> Result<(), BusError>;
}

/// Factory for [`RemoteBus`] sessions.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn RemoteBus>, BusError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_error_names_follow_dbus_convention() {
        let err = MethodError::UnknownMethod {
            interface: "a.b".into(),
            member: "C".into(),
        };
        assert_eq!(err.error_name(), "org.freedesktop.DBus.Error.UnknownMethod");
        assert_eq!(err.to_string(), "unknown method a.b.C");
        assert_eq!(
            MethodError::ReadOnlyProperty("Rate".into()).error_name(),
            "org.freedesktop.DBus.Error.PropertyReadOnly"
        );
    }

    #[test]
    fn test_bus_error_keeps_source() {
        use std::error::Error as _;

        let err = BusError::Connect {
            address: "tcp:host=127.0.0.1".into(),
            source: "refused".into(),
        };
        assert!(err.to_string().contains("refused"));
        assert!(err.source().is_some());
    }
}
