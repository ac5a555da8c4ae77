//! Transport-neutral value model for the remote object bus.
//!
//! The bridge never talks to a concrete bus library directly.  It builds
//! [`MethodCall`]s and [`Signal`]s out of [`BusValue`]s and hands them to
//! whatever transport implements the bridge's `RemoteBus` capability.  The
//! subset of types here is exactly what the notification and media-control
//! surfaces need.

use std::collections::BTreeMap;
use std::fmt;

/// Type tag of a [`BusValue`], used to validate property writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusType {
    Bool,
    Byte,
    Int32,
    UInt32,
    Int64,
    Double,
    Str,
    ObjectPath,
    StrList,
    Dict,
    Variant,
}

impl BusType {
    /// D-Bus type signature of the tag.
    pub fn signature(self) -> &'static str {
        match self {
            Self::Bool => "b",
            Self::Byte => "y",
            Self::Int32 => "i",
            Self::UInt32 => "u",
            Self::Int64 => "x",
            Self::Double => "d",
            Self::Str => "s",
            Self::ObjectPath => "o",
            Self::StrList => "as",
            Self::Dict => "a{sv}",
            Self::Variant => "v",
        }
    }
}

/// A single typed value carried in a method call, reply, or signal.
#[derive(Debug, Clone, PartialEq)]
pub enum BusValue {
    Bool(bool),
    Byte(u8),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    StrList(Vec<String>),
    /// String-keyed dictionary of variants (`a{sv}`).
    Dict(BTreeMap<String, BusValue>),
    /// Explicit variant wrapper (`v`).
    Variant(Box<BusValue>),
}

impl BusValue {
    pub fn bus_type(&self) -> BusType {
        match self {
            Self::Bool(_) => BusType::Bool,
            Self::Byte(_) => BusType::Byte,
            Self::Int32(_) => BusType::Int32,
            Self::UInt32(_) => BusType::UInt32,
            Self::Int64(_) => BusType::Int64,
            Self::Double(_) => BusType::Double,
            Self::Str(_) => BusType::Str,
            Self::ObjectPath(_) => BusType::ObjectPath,
            Self::StrList(_) => BusType::StrList,
            Self::Dict(_) => BusType::Dict,
            Self::Variant(_) => BusType::Variant,
        }
    }

    /// Strips any number of variant wrappers.
    pub fn unwrap_variant(&self) -> &BusValue {
        let mut value = self;
        while let Self::Variant(inner) = value {
            value = inner;
        }
        value
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.unwrap_variant() {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self.unwrap_variant() {
            Self::UInt32(v) => Some(*v),
            Self::Byte(v) => Some(u32::from(*v)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.unwrap_variant() {
            Self::Int64(v) => Some(*v),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.unwrap_variant() {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// String content of a `Str` or `ObjectPath` value.
    pub fn as_str(&self) -> Option<&str> {
        match self.unwrap_variant() {
            Self::Str(s) | Self::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, BusValue>> {
        match self.unwrap_variant() {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn variant(value: BusValue) -> Self {
        Self::Variant(Box::new(value))
    }
}

impl From<bool> for BusValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u8> for BusValue {
    fn from(v: u8) -> Self {
        Self::Byte(v)
    }
}

impl From<i32> for BusValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<u32> for BusValue {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<i64> for BusValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for BusValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for BusValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for BusValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<String>> for BusValue {
    fn from(v: Vec<String>) -> Self {
        Self::StrList(v)
    }
}

impl From<BTreeMap<String, BusValue>> for BusValue {
    fn from(v: BTreeMap<String, BusValue>) -> Self {
        Self::Dict(v)
    }
}

/// An outbound (or, for exported objects, inbound) method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Well-known or unique bus name of the callee.
    pub destination: Option<String>,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<BusValue>,
}

impl MethodCall {
    pub fn new(
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<BusValue>,
    ) -> Self {
        Self {
            destination: Some(destination.into()),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }
}

impl fmt::Display for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} on {}", self.interface, self.member, self.path)
    }
}

/// A broadcast signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<BusValue>,
}

impl Signal {
    pub fn new(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<BusValue>,
    ) -> Self {
        Self {
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} from {}", self.interface, self.member, self.path)
    }
}

/// Subscription filter for incoming signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMatch {
    pub interface: String,
    pub member: String,
    pub path: Option<String>,
}

impl SignalMatch {
    pub fn new(interface: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            member: member.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn matches(&self, signal: &Signal) -> bool {
        self.interface == signal.interface
            && self.member == signal.member
            && self.path.as_ref().map_or(true, |p| p == &signal.path)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
