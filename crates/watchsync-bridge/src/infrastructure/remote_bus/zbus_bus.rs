//! zbus adapter: a real D-Bus session to the watch over TCP.
//!
//! The watch exposes its session bus on a TCP address (by default
//! `tcp:host=127.0.0.1,port=55556` forwarded over the device link).  This
//! adapter maps the transport-neutral [`RemoteBus`] operations onto a
//! `zbus::Connection`:
//!
//! | RemoteBus            | zbus                                             |
//! |----------------------|--------------------------------------------------|
//! | `call_method`        | `Connection::call_method`                        |
//! | `emit_signal`        | `Connection::emit_signal`                        |
//! | `add_match`          | `MessageStream::for_match_rule` + forward task   |
//! | `export_object`      | method-call stream for the path + reply task     |
//! | `request_name`       | `Connection::request_name`                       |
//!
//! Bodies are built and decoded dynamically through `zvariant::Structure`
//! because the bridge never knows argument types at compile time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use watchsync_core::{BusValue, MethodCall, Signal, SignalMatch};
use zbus::message::{Message, Type as MessageType};
use zbus::zvariant::{ObjectPath, Structure, StructureBuilder, Value};
use zbus::{Connection, MatchRule, MessageStream};

use crate::application::remote_bus::{
    BoxError, BusConnector, BusError, MatchId, ObjectHandler, RemoteBus, SignalSink,
};

/// Signals buffered per subscription before zbus starts dropping them.
const STREAM_CAPACITY: usize = 64;

#[derive(Default)]
struct Tasks {
    matches: HashMap<MatchId, JoinHandle<()>>,
    objects: HashMap<String, JoinHandle<()>>,
}

/// One D-Bus session at a fixed address.
pub struct ZbusBus {
    address: String,
    connection: Mutex<Option<Connection>>,
    tasks: Mutex<Tasks>,
    next_match_id: AtomicU64,
}

impl ZbusBus {
    /// Connects to `address` (D-Bus address syntax).
    ///
    /// # Errors
    ///
    /// [`BusError::Connect`] if the address is invalid or the handshake fails.
    pub async fn connect(address: &str) -> Result<Self, BusError> {
        let connection = open_connection(address).await?;
        Ok(Self {
            address: address.to_string(),
            connection: Mutex::new(Some(connection)),
            tasks: Mutex::new(Tasks::default()),
            next_match_id: AtomicU64::new(1),
        })
    }

    fn connection(&self) -> Result<Connection, BusError> {
        self.connection
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(BusError::Disconnected)
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn abort_all(&self) {
        let mut tasks = self.tasks();
        for (_, task) in tasks.matches.drain() {
            task.abort();
        }
        for (_, task) in tasks.objects.drain() {
            task.abort();
        }
    }
}

async fn open_connection(address: &str) -> Result<Connection, BusError> {
    let connect_error = |e: zbus::Error| BusError::Connect {
        address: address.to_string(),
        source: Box::new(e),
    };
    zbus::connection::Builder::address(address)
        .map_err(connect_error)?
        .build()
        .await
        .map_err(connect_error)
}

fn call_error(call: impl ToString, e: zbus::Error) -> BusError {
    BusError::Call {
        call: call.to_string(),
        source: Box::new(e),
    }
}

#[async_trait]
impl RemoteBus for ZbusBus {
    async fn call_method(&self, call: MethodCall) -> Result<Vec<BusValue>, BusError> {
        let connection = self.connection()?;
        let body = encode_body(&call.args).map_err(|source| BusError::Call {
            call: call.to_string(),
            source,
        })?;
        let reply = match &body {
            Some(body) => {
                connection
                    .call_method(
                        call.destination.as_deref(),
                        call.path.as_str(),
                        Some(call.interface.as_str()),
                        call.member.as_str(),
                        body,
                    )
                    .await
            }
            None => {
                connection
                    .call_method(
                        call.destination.as_deref(),
                        call.path.as_str(),
                        Some(call.interface.as_str()),
                        call.member.as_str(),
                        &(),
                    )
                    .await
            }
        }
        .map_err(|e| call_error(&call, e))?;
        decode_body(&reply).ok_or(BusError::UnexpectedReply {
            call: call.to_string(),
        })
    }

    async fn emit_signal(&self, signal: Signal) -> Result<(), BusError> {
        let connection = self.connection()?;
        let body = encode_body(&signal.args).map_err(|source| BusError::Call {
            call: signal.to_string(),
            source,
        })?;
        let result = match &body {
            Some(body) => {
                connection
                    .emit_signal(
                        None::<&str>,
                        signal.path.as_str(),
                        signal.interface.as_str(),
                        signal.member.as_str(),
                        body,
                    )
                    .await
            }
            None => {
                connection
                    .emit_signal(
                        None::<&str>,
                        signal.path.as_str(),
                        signal.interface.as_str(),
                        signal.member.as_str(),
                        &(),
                    )
                    .await
            }
        };
        result.map_err(|e| call_error(&signal, e))
    }

    async fn add_match(&self, rule: SignalMatch, sink: SignalSink) -> Result<MatchId, BusError> {
        let connection = self.connection()?;
        let rule_error = |e: zbus::Error| BusError::Call {
            call: format!("AddMatch {}.{}", rule.interface, rule.member),
            source: Box::new(e),
        };
        let mut builder = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .interface(rule.interface.as_str())
            .map_err(rule_error)?
            .member(rule.member.as_str())
            .map_err(rule_error)?;
        if let Some(path) = &rule.path {
            builder = builder.path(path.as_str()).map_err(rule_error)?;
        }
        let mut stream =
            MessageStream::for_match_rule(builder.build(), &connection, Some(STREAM_CAPACITY))
                .await
                .map_err(rule_error)?;

        let id = self.next_match_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("signal stream error: {e}");
                        continue;
                    }
                };
                let Some(signal) = signal_from_message(&message) else {
                    continue;
                };
                if sink.send(signal).is_err() {
                    break;
                }
            }
        });
        self.tasks().matches.insert(id, task);
        Ok(id)
    }

    async fn remove_match(&self, id: MatchId) -> Result<(), BusError> {
        // Dropping the stream removes the rule from the bus.
        if let Some(task) = self.tasks().matches.remove(&id) {
            task.abort();
        }
        Ok(())
    }

    async fn request_name(&self, name: &str) -> Result<(), BusError> {
        let connection = self.connection()?;
        connection
            .request_name(name)
            .await
            .map_err(|e| BusError::Name {
                name: name.to_string(),
                source: Box::new(e),
            })
    }

    async fn release_name(&self, name: &str) -> Result<(), BusError> {
        let connection = self.connection()?;
        connection
            .release_name(name)
            .await
            .map(|_released| ())
            .map_err(|e| BusError::Name {
                name: name.to_string(),
                source: Box::new(e),
            })
    }

    async fn export_object(
        &self,
        path: &str,
        handler: Arc<dyn ObjectHandler>,
    ) -> Result<(), BusError> {
        let connection = self.connection()?;
        let export_error = |e: zbus::Error| BusError::Export {
            path: path.to_string(),
            source: Box::new(e),
        };
        let rule = MatchRule::builder()
            .msg_type(MessageType::MethodCall)
            .path(path)
            .map_err(export_error)?
            .build();
        let mut stream = MessageStream::for_match_rule(rule, &connection, Some(STREAM_CAPACITY))
            .await
            .map_err(export_error)?;

        let object_path = path.to_string();
        let task = tokio::spawn(async move {
            while let Some(Ok(message)) = stream.next().await {
                dispatch_call(&connection, &object_path, handler.as_ref(), &message).await;
            }
        });
        if let Some(previous) = self.tasks().objects.insert(path.to_string(), task) {
            previous.abort();
        }
        Ok(())
    }

    async fn unexport_object(&self, path: &str) -> Result<(), BusError> {
        if let Some(task) = self.tasks().objects.remove(path) {
            task.abort();
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BusError> {
        self.abort_all();
        let connection = open_connection(&self.address).await?;
        let previous = self
            .connection
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(connection);
        if let Some(previous) = previous {
            let _ = previous.close().await;
        }
        debug!(address = %self.address, "remote bus session re-established");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.abort_all();
        let previous = self
            .connection
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(connection) = previous {
            connection
                .close()
                .await
                .map_err(|e| call_error("disconnect", e))?;
        }
        Ok(())
    }
}

/// Answers one incoming method call on an exported path.
async fn dispatch_call(
    connection: &Connection,
    path: &str,
    handler: &dyn ObjectHandler,
    message: &Message,
) {
    let header = message.header();
    let (Some(interface), Some(member)) = (header.interface(), header.member()) else {
        return;
    };
    let args = decode_body(message).unwrap_or_default();
    let outcome = handler
        .handle_call(interface.as_str(), member.as_str(), args)
        .await;

    let sent = match outcome {
        Ok(values) => match encode_body(&values) {
            Ok(Some(body)) => connection.reply(&header, &body).await,
            Ok(None) => connection.reply(&header, &()).await,
            Err(e) => {
                warn!(path, %member, "cannot encode reply: {e}");
                return;
            }
        },
        Err(err) => {
            connection
                .reply_error(&header, err.error_name(), &err.to_string())
                .await
        }
    };
    if let Err(e) = sent {
        warn!(path, %member, "failed to send reply: {e}");
    }
}

fn signal_from_message(message: &Message) -> Option<Signal> {
    let header = message.header();
    let path = header.path()?.to_string();
    let interface = header.interface()?.to_string();
    let member = header.member()?.to_string();
    let args = decode_body(message)?;
    Some(Signal::new(path, interface, member, args))
}

// ── Value conversion ──────────────────────────────────────────────────────────

/// Packs `args` into a message body, or `None` for an empty body.
fn encode_body(args: &[BusValue]) -> Result<Option<Structure<'static>>, BoxError> {
    if args.is_empty() {
        return Ok(None);
    }
    let builder = args
        .iter()
        .fold(StructureBuilder::new(), |builder, arg| {
            builder.append_field(to_value(arg))
        });
    Ok(Some(builder.build()?))
}

fn decode_body(message: &Message) -> Option<Vec<BusValue>> {
    let body = message.body();
    if body.signature().to_string().is_empty() {
        return Some(Vec::new());
    }
    let structure: Structure<'_> = body.deserialize().ok()?;
    Some(structure.fields().iter().map(from_value).collect())
}

fn to_value(value: &BusValue) -> Value<'static> {
    match value {
        BusValue::Bool(v) => Value::from(*v),
        BusValue::Byte(v) => Value::from(*v),
        BusValue::Int32(v) => Value::from(*v),
        BusValue::UInt32(v) => Value::from(*v),
        BusValue::Int64(v) => Value::from(*v),
        BusValue::Double(v) => Value::from(*v),
        BusValue::Str(s) => Value::from(s.clone()),
        BusValue::ObjectPath(p) => match ObjectPath::try_from(p.clone()) {
            Ok(path) => Value::from(path),
            Err(_) => Value::from(p.clone()),
        },
        BusValue::StrList(items) => Value::from(items.clone()),
        BusValue::Dict(entries) => {
            // Entries of an `a{sv}` are variants already; drop one layer so
            // zbus does not wrap them a second time.
            let dict: HashMap<String, Value<'static>> = entries
                .iter()
                .map(|(k, v)| (k.clone(), to_value(dict_entry(v))))
                .collect();
            Value::from(dict)
        }
        BusValue::Variant(inner) => Value::Value(Box::new(to_value(inner))),
    }
}

fn dict_entry(value: &BusValue) -> &BusValue {
    match value {
        BusValue::Variant(inner) => inner,
        other => other,
    }
}

fn from_value(value: &Value<'_>) -> BusValue {
    match value {
        Value::Bool(v) => BusValue::Bool(*v),
        Value::U8(v) => BusValue::Byte(*v),
        Value::I32(v) => BusValue::Int32(*v),
        Value::U32(v) => BusValue::UInt32(*v),
        Value::I64(v) => BusValue::Int64(*v),
        Value::F64(v) => BusValue::Double(*v),
        Value::Str(s) => BusValue::Str(s.to_string()),
        Value::ObjectPath(p) => BusValue::ObjectPath(p.to_string()),
        Value::Array(items) => BusValue::StrList(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Str(s) => Some(s.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        Value::Dict(dict) => BusValue::Dict(
            dict.iter()
                .filter_map(|(k, v)| match k {
                    Value::Str(key) => Some((key.to_string(), from_value(v))),
                    _ => None,
                })
                .collect(),
        ),
        Value::Value(inner) => BusValue::variant(from_value(inner)),
        other => BusValue::Str(other.to_string()),
    }
}

// ── Connector ─────────────────────────────────────────────────────────────────

/// Opens a fresh [`ZbusBus`] per connection attempt.
#[derive(Debug, Default)]
pub struct ZbusConnector;

#[async_trait]
impl BusConnector for ZbusConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn RemoteBus>, BusError> {
        let bus: Arc<dyn RemoteBus> = Arc::new(ZbusBus::connect(address).await?);
        Ok(bus)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
