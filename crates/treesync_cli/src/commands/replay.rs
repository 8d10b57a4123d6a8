//! Replay command implementation.
//!
//! A script is a JSON array of steps. Each step is either something the
//! application does (`subscribe`, `set`, ...) or something the server sends
//! (`server_update`, `ack`, ...). The engine runs over a framed transport;
//! every frame it writes is decoded again and reported, followed by the
//! events each listener received during the step.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path as FsPath;
use std::sync::mpsc::Receiver;
use thiserror::Error;
use tracing::debug;
use treesync_core::{
    priority_to_json, ChannelSink, Event, ListenMode, ListenerHandle, MergeMap, Node, Operation,
    Path, QueryFilter, QuerySpec,
};
use treesync_engine::{
    ChannelFrameWriter, EngineConfig, FramedTransport, SyncEngine, SyncError, SyncResult,
    TransactionUpdate,
};
use treesync_protocol::{FrameDecode, OutboundMessage, RevertReason};

/// Errors that stop a replay.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// The script could not be read.
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),

    /// The script is not a valid list of steps.
    #[error("invalid script: {0}")]
    Script(#[from] serde_json::Error),

    /// A step was rejected by the engine.
    #[error("step {step} ({op}) failed: {source}")]
    Step {
        /// Zero-based step index.
        step: usize,
        /// Step name.
        op: &'static str,
        /// Engine error.
        source: SyncError,
    },
}

/// Listen mode as written in scripts.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptMode {
    /// `value` events only.
    Value,
    /// Child events only.
    Children,
    /// Everything.
    #[default]
    All,
}

impl From<ScriptMode> for ListenMode {
    fn from(mode: ScriptMode) -> Self {
        match mode {
            ScriptMode::Value => ListenMode::Value,
            ScriptMode::Children => ListenMode::Children,
            ScriptMode::All => ListenMode::All,
        }
    }
}

/// One scripted step.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// The transport connects.
    Connect,
    /// The transport drops.
    Disconnect,
    /// Register a listener.
    Subscribe {
        /// Listened path.
        path: String,
        /// Query filter descriptor.
        #[serde(default)]
        filter: String,
        /// Which events to receive.
        #[serde(default)]
        mode: ScriptMode,
    },
    /// Remove the listeners registered on a query.
    Unsubscribe {
        /// Listened path.
        path: String,
        /// Query filter descriptor.
        #[serde(default)]
        filter: String,
    },
    /// Local overwrite.
    Set {
        /// Target path.
        path: String,
        /// New value (JSON export format).
        value: Value,
    },
    /// Local multi-child update.
    Update {
        /// Target path.
        path: String,
        /// Relative paths mapped to new values.
        value: Map<String, Value>,
    },
    /// Local removal.
    Remove {
        /// Target path.
        path: String,
    },
    /// Transaction adding `by` to the number at `path`.
    Increment {
        /// Target path.
        path: String,
        /// Amount to add.
        by: f64,
    },
    /// Server push, optionally for one filtered listen.
    ServerUpdate {
        /// Pushed path.
        path: String,
        /// Pushed value.
        value: Value,
        /// Query filter descriptor; empty for unfiltered data.
        #[serde(default)]
        filter: String,
    },
    /// Server acknowledgment.
    Ack {
        /// Acknowledged write.
        write_id: u64,
        /// Server time used for timestamp placeholders.
        #[serde(default)]
        server_time: Option<f64>,
    },
    /// Server rejection.
    Revert {
        /// Rejected write.
        write_id: u64,
        /// Status string.
        reason: String,
    },
    /// The server finished the initial data of a listen.
    ListenComplete {
        /// Listened path.
        path: String,
        /// Query filter descriptor.
        #[serde(default)]
        filter: String,
    },
    /// The server revoked a listen.
    ListenRevoked {
        /// Listened path.
        path: String,
        /// Query filter descriptor.
        #[serde(default)]
        filter: String,
        /// Status string.
        reason: String,
    },
    /// Register an on-disconnect overwrite.
    OnDisconnectSet {
        /// Target path.
        path: String,
        /// Value to write on disconnect.
        value: Value,
    },
    /// Forget on-disconnect registrations.
    CancelOnDisconnect {
        /// Target path.
        path: String,
    },
    /// Report the current value at a path.
    Print {
        /// Path to print.
        path: String,
    },
}

impl Step {
    /// Returns the step name used in scripts.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Connect => "connect",
            Step::Disconnect => "disconnect",
            Step::Subscribe { .. } => "subscribe",
            Step::Unsubscribe { .. } => "unsubscribe",
            Step::Set { .. } => "set",
            Step::Update { .. } => "update",
            Step::Remove { .. } => "remove",
            Step::Increment { .. } => "increment",
            Step::ServerUpdate { .. } => "server_update",
            Step::Ack { .. } => "ack",
            Step::Revert { .. } => "revert",
            Step::ListenComplete { .. } => "listen_complete",
            Step::ListenRevoked { .. } => "listen_revoked",
            Step::OnDisconnectSet { .. } => "on_disconnect_set",
            Step::CancelOnDisconnect { .. } => "cancel_on_disconnect",
            Step::Print { .. } => "print",
        }
    }
}

/// One line of replay output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    /// A message the engine sent.
    Outbound {
        /// Step index.
        step: usize,
        /// Decoded message.
        message: Value,
    },
    /// An event a listener received.
    Event {
        /// Step index.
        step: usize,
        /// Listener that received it.
        listener: String,
        /// The event.
        event: Value,
    },
    /// Output of a `print` step.
    Value {
        /// Step index.
        step: usize,
        /// Printed path.
        path: String,
        /// Current value.
        value: Value,
    },
}

impl Record {
    fn to_text(&self) -> String {
        match self {
            Record::Outbound { step, message } => format!("{step:>4} -> {message}"),
            Record::Event {
                step,
                listener,
                event,
            } => format!("{step:>4} <- {listener} {event}"),
            Record::Value { step, path, value } => format!("{step:>4} =  {path} {value}"),
        }
    }
}

struct Subscription {
    query: QuerySpec,
    handle: ListenerHandle,
    events: Receiver<Event>,
}

/// Drives an engine through a script.
pub struct Replayer {
    engine: SyncEngine<FramedTransport<ChannelFrameWriter>>,
    frames: Receiver<Bytes>,
    subscriptions: Vec<Subscription>,
    records: Vec<Record>,
}

impl Replayer {
    /// Creates a disconnected replayer.
    pub fn new(config: EngineConfig) -> Self {
        let (writer, frames) = ChannelFrameWriter::new();
        Self {
            engine: SyncEngine::new(config, FramedTransport::new(writer)),
            frames,
            subscriptions: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Runs every step in order and returns the collected records.
    pub fn run(mut self, steps: &[Step]) -> Result<Vec<Record>, ReplayError> {
        for (index, step) in steps.iter().enumerate() {
            debug!(step = index, op = step.name(), "replay step");
            self.apply(index, step)
                .and_then(|()| self.collect(index))
                .map_err(|source| ReplayError::Step {
                    step: index,
                    op: step.name(),
                    source,
                })?;
        }
        Ok(self.records)
    }

    fn apply(&mut self, index: usize, step: &Step) -> SyncResult<()> {
        let engine = &self.engine;
        match step {
            Step::Connect => {
                engine.on_connecting()?;
                engine.on_connected()
            }
            Step::Disconnect => engine.on_disconnected(),
            Step::Subscribe { path, filter, mode } => {
                let query = QuerySpec::new(Path::parse(path)?, QueryFilter::new(filter.as_str()));
                let (sink, events) = ChannelSink::new();
                let handle = engine.subscribe(
                    query.path.clone(),
                    query.filter.clone(),
                    (*mode).into(),
                    sink,
                )?;
                self.subscriptions.push(Subscription {
                    query,
                    handle,
                    events,
                });
                Ok(())
            }
            Step::Unsubscribe { path, filter } => {
                let query = QuerySpec::new(Path::parse(path)?, QueryFilter::new(filter.as_str()));
                self.collect(index)?;
                let engine = &self.engine;
                self.subscriptions.retain(|sub| {
                    if sub.query == query {
                        engine.unsubscribe(sub.handle);
                        false
                    } else {
                        true
                    }
                });
                Ok(())
            }
            Step::Set { path, value } => engine
                .set(Path::parse(path)?, Node::from_json(value)?)
                .map(drop),
            Step::Update { path, value } => {
                let mut merge = MergeMap::new();
                for (relative, child) in value {
                    merge.insert(Path::parse(relative)?, Node::from_json(child)?);
                }
                engine.update(Path::parse(path)?, merge).map(drop)
            }
            Step::Remove { path } => engine.remove(Path::parse(path)?).map(drop),
            Step::Increment { path, by } => {
                let by = *by;
                engine
                    .run_transaction(Path::parse(path)?, move |current| {
                        TransactionUpdate::Commit(Node::from(current.as_f64().unwrap_or(0.0) + by))
                    })
                    .map(drop)
            }
            Step::ServerUpdate {
                path,
                value,
                filter,
            } => engine.on_query_update(
                Path::parse(path)?,
                QueryFilter::new(filter.as_str()),
                Node::from_json(value)?,
            ),
            Step::Ack {
                write_id,
                server_time: Some(time),
            } => engine.on_ack_with_server_time(*write_id, *time),
            Step::Ack { write_id, .. } => engine.on_ack(*write_id),
            Step::Revert { write_id, reason } => {
                engine.on_revert(*write_id, RevertReason::from_status(reason))
            }
            Step::ListenComplete { path, filter } => engine
                .on_listen_complete(Path::parse(path)?, QueryFilter::new(filter.as_str())),
            Step::ListenRevoked {
                path,
                filter,
                reason,
            } => engine.on_listen_revoked(
                Path::parse(path)?,
                QueryFilter::new(filter.as_str()),
                reason,
            ),
            Step::OnDisconnectSet { path, value } => engine
                .queue_on_disconnect(Path::parse(path)?, Operation::Set(Node::from_json(value)?)),
            Step::CancelOnDisconnect { path } => engine.cancel_on_disconnect(Path::parse(path)?),
            Step::Print { path } => {
                let at = Path::parse(path)?;
                let value = engine.current_value(&at).to_json();
                self.records.push(Record::Value {
                    step: index,
                    path: at.to_string(),
                    value,
                });
                Ok(())
            }
        }
    }

    /// Records the frames written and the events delivered so far.
    fn collect(&mut self, index: usize) -> SyncResult<()> {
        while let Ok(frame) = self.frames.try_recv() {
            let message = OutboundMessage::decode_frame(&frame)?;
            self.records.push(Record::Outbound {
                step: index,
                message: outbound_json(&message),
            });
        }
        for sub in &self.subscriptions {
            for event in sub.events.try_iter() {
                self.records.push(Record::Event {
                    step: index,
                    listener: sub.handle.to_string(),
                    event: event_json(&event),
                });
            }
        }
        Ok(())
    }
}

fn operation_json(operation: &Operation) -> Value {
    match operation {
        Operation::Set(node) => json!({ "set": node.to_json() }),
        Operation::Merge(entries) => {
            let merge: Map<String, Value> = entries
                .iter()
                .map(|(relative, node)| (relative.to_string(), node.to_json()))
                .collect();
            json!({ "merge": merge })
        }
        Operation::SetPriority(priority) => json!({ "set_priority": priority_to_json(priority) }),
    }
}

fn outbound_json(message: &OutboundMessage) -> Value {
    match message {
        OutboundMessage::Listen { query } | OutboundMessage::Unlisten { query } => {
            json!({ "kind": message.kind(), "query": query.to_string() })
        }
        OutboundMessage::Write {
            write_id,
            path,
            operation,
            precondition,
        } => {
            let mut out = json!({
                "kind": message.kind(),
                "write_id": write_id,
                "path": path.to_string(),
                "operation": operation_json(operation),
            });
            if let (Some(hash), Some(map)) = (precondition, out.as_object_mut()) {
                map.insert("precondition".into(), Value::String(hash.clone()));
            }
            out
        }
        OutboundMessage::OnDisconnect { path, operation } => json!({
            "kind": message.kind(),
            "path": path.to_string(),
            "operation": operation_json(operation),
        }),
        OutboundMessage::CancelOnDisconnect { path } => {
            json!({ "kind": message.kind(), "path": path.to_string() })
        }
    }
}

fn event_json(event: &Event) -> Value {
    let mut out = Map::new();
    out.insert("type".into(), json!(event.event_type().as_str()));
    out.insert("path".into(), json!(event.path().to_string()));
    if let Some(key) = event.key() {
        out.insert("key".into(), json!(key.as_str()));
    }
    if let Some(node) = event.node() {
        out.insert("value".into(), node.to_json());
    }
    match event {
        Event::ChildAdded { prev, .. }
        | Event::ChildChanged { prev, .. }
        | Event::ChildMoved { prev, .. } => {
            out.insert(
                "prev".into(),
                prev.as_ref().map_or(Value::Null, |k| json!(k.as_str())),
            );
        }
        Event::Cancel { reason, .. } => {
            out.insert("reason".into(), json!(reason));
        }
        _ => {}
    }
    Value::Object(out)
}

/// Parses a script.
pub fn parse_script(source: &str) -> Result<Vec<Step>, ReplayError> {
    Ok(serde_json::from_str(source)?)
}

/// Runs the replay command.
pub fn run(script: &FsPath, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(script).map_err(ReplayError::from)?;
    let steps = parse_script(&source)?;
    let records = Replayer::new(EngineConfig::default()).run(&steps)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            for record in &records {
                println!("{}", record.to_text());
            }
        }
    }

    Ok(())
}
