//! Messages exchanged between the sync engine and the transport.
//!
//! [`OutboundMessage`] and [`InboundMessage`] carry core types. On the wire
//! they travel as serde mirrors in which paths are strings and nodes are
//! their JSON export, so any peer that speaks JSON can produce them.

use crate::error::{ProtocolError, ProtocolResult};
use crate::reason::RevertReason;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use treesync_core::{
    priority_from_json, priority_to_json, MergeMap, Node, Operation, Path, QueryFilter, QuerySpec,
    WriteId,
};

/// A message from the engine to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Start receiving data for a query.
    Listen {
        /// The query.
        query: QuerySpec,
    },
    /// Stop receiving data for a query.
    Unlisten {
        /// The query.
        query: QuerySpec,
    },
    /// Apply a write.
    Write {
        /// Local write id, echoed by the ack or revert.
        write_id: WriteId,
        /// Target path.
        path: Path,
        /// The mutation.
        operation: Operation,
        /// Hash the current server value must match, for transactions.
        precondition: Option<String>,
    },
    /// Register an operation to run when this client disconnects.
    OnDisconnect {
        /// Target path.
        path: Path,
        /// The mutation.
        operation: Operation,
    },
    /// Forget on-disconnect operations at or below a path.
    CancelOnDisconnect {
        /// Target path.
        path: Path,
    },
}

impl OutboundMessage {
    /// Returns a short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Listen { .. } => "listen",
            OutboundMessage::Unlisten { .. } => "unlisten",
            OutboundMessage::Write { .. } => "write",
            OutboundMessage::OnDisconnect { .. } => "on_disconnect",
            OutboundMessage::CancelOnDisconnect { .. } => "cancel_on_disconnect",
        }
    }
}

/// A message from the transport to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The connection is up.
    Connected,
    /// The connection dropped.
    Disconnected,
    /// The server value at a path.
    ServerUpdate {
        /// Path of the value.
        path: Path,
        /// New value.
        node: Node,
    },
    /// New values for several descendants of a path.
    ServerMerge {
        /// Common ancestor.
        path: Path,
        /// Relative path → value.
        merge: MergeMap,
    },
    /// The server's result set for a filtered query.
    ///
    /// Filtered queries only take data from these tagged messages; untagged
    /// updates feed the shared cache read by unfiltered queries.
    QueryUpdate {
        /// The query.
        query: QuerySpec,
        /// Value at the query path, restricted to the children the filter selects.
        node: Node,
    },
    /// Changes to the result set of a filtered query.
    QueryMerge {
        /// The query.
        query: QuerySpec,
        /// Path relative to the query path → value.
        merge: MergeMap,
    },
    /// The server sent everything it has for a query.
    ListenComplete {
        /// The query.
        query: QuerySpec,
    },
    /// The server will no longer serve a query.
    ListenRevoked {
        /// The query.
        query: QuerySpec,
        /// Status given by the server.
        reason: String,
    },
    /// A write was applied.
    Ack {
        /// Write id.
        write_id: WriteId,
        /// Server time used for timestamp placeholders, in milliseconds.
        server_time: Option<f64>,
    },
    /// A write was rejected.
    Revert {
        /// Write id.
        write_id: WriteId,
        /// Why.
        reason: RevertReason,
    },
}

impl InboundMessage {
    /// Returns a short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Connected => "connected",
            InboundMessage::Disconnected => "disconnected",
            InboundMessage::ServerUpdate { .. } => "server_update",
            InboundMessage::ServerMerge { .. } => "server_merge",
            InboundMessage::QueryUpdate { .. } => "query_update",
            InboundMessage::QueryMerge { .. } => "query_merge",
            InboundMessage::ListenComplete { .. } => "listen_complete",
            InboundMessage::ListenRevoked { .. } => "listen_revoked",
            InboundMessage::Ack { .. } => "ack",
            InboundMessage::Revert { .. } => "revert",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum WireOperation {
    Set {
        data: JsonValue,
    },
    Merge {
        data: BTreeMap<String, JsonValue>,
    },
    SetPriority {
        priority: JsonValue,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum WireOutbound {
    Listen {
        path: String,
        filter: String,
    },
    Unlisten {
        path: String,
        filter: String,
    },
    Write {
        id: u64,
        path: String,
        op: WireOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
    },
    OnDisconnect {
        path: String,
        op: WireOperation,
    },
    CancelOnDisconnect {
        path: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum WireInbound {
    Connected,
    Disconnected,
    ServerUpdate {
        path: String,
        data: JsonValue,
    },
    ServerMerge {
        path: String,
        data: BTreeMap<String, JsonValue>,
    },
    QueryUpdate {
        path: String,
        filter: String,
        data: JsonValue,
    },
    QueryMerge {
        path: String,
        filter: String,
        data: BTreeMap<String, JsonValue>,
    },
    ListenComplete {
        path: String,
        filter: String,
    },
    ListenRevoked {
        path: String,
        filter: String,
        reason: String,
    },
    Ack {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_time: Option<f64>,
    },
    Revert {
        id: u64,
        status: String,
    },
}

fn parse_path(field: &str, raw: &str) -> ProtocolResult<Path> {
    Path::parse(raw).map_err(|e| ProtocolError::invalid_field(field, e))
}

fn parse_node(field: &str, raw: &JsonValue) -> ProtocolResult<Node> {
    Node::from_json(raw).map_err(|e| ProtocolError::invalid_field(field, e))
}

fn parse_merge(raw: &BTreeMap<String, JsonValue>) -> ProtocolResult<MergeMap> {
    raw.iter()
        .map(|(path, value)| Ok((parse_path("data", path)?, parse_node("data", value)?)))
        .collect()
}

fn export_merge(merge: &MergeMap) -> BTreeMap<String, JsonValue> {
    merge
        .iter()
        .map(|(path, node)| (path.to_string(), node.to_json()))
        .collect()
}

fn query(path: &str, filter: String) -> ProtocolResult<QuerySpec> {
    Ok(QuerySpec::new(parse_path("path", path)?, QueryFilter::new(filter)))
}

impl From<&Operation> for WireOperation {
    fn from(operation: &Operation) -> Self {
        match operation {
            Operation::Set(node) => WireOperation::Set {
                data: node.to_json(),
            },
            Operation::Merge(merge) => WireOperation::Merge {
                data: export_merge(merge),
            },
            Operation::SetPriority(priority) => WireOperation::SetPriority {
                priority: priority_to_json(priority),
            },
        }
    }
}

impl TryFrom<WireOperation> for Operation {
    type Error = ProtocolError;

    fn try_from(wire: WireOperation) -> ProtocolResult<Self> {
        match wire {
            WireOperation::Set { data } => Ok(Operation::Set(parse_node("data", &data)?)),
            WireOperation::Merge { data } => {
                Operation::merge(parse_merge(&data)?).map_err(|e| ProtocolError::invalid_field("data", e))
            }
            WireOperation::SetPriority { priority } => Ok(Operation::SetPriority(
                priority_from_json(&priority, &Path::root())
                    .map_err(|e| ProtocolError::invalid_field("priority", e))?,
            )),
        }
    }
}

impl From<&OutboundMessage> for WireOutbound {
    fn from(message: &OutboundMessage) -> Self {
        match message {
            OutboundMessage::Listen { query } => WireOutbound::Listen {
                path: query.path.to_string(),
                filter: query.filter.as_str().to_string(),
            },
            OutboundMessage::Unlisten { query } => WireOutbound::Unlisten {
                path: query.path.to_string(),
                filter: query.filter.as_str().to_string(),
            },
            OutboundMessage::Write {
                write_id,
                path,
                operation,
                precondition,
            } => WireOutbound::Write {
                id: *write_id,
                path: path.to_string(),
                op: operation.into(),
                hash: precondition.clone(),
            },
            OutboundMessage::OnDisconnect { path, operation } => WireOutbound::OnDisconnect {
                path: path.to_string(),
                op: operation.into(),
            },
            OutboundMessage::CancelOnDisconnect { path } => WireOutbound::CancelOnDisconnect {
                path: path.to_string(),
            },
        }
    }
}

impl TryFrom<WireOutbound> for OutboundMessage {
    type Error = ProtocolError;

    fn try_from(wire: WireOutbound) -> ProtocolResult<Self> {
        Ok(match wire {
            WireOutbound::Listen { path, filter } => OutboundMessage::Listen {
                query: query(&path, filter)?,
            },
            WireOutbound::Unlisten { path, filter } => OutboundMessage::Unlisten {
                query: query(&path, filter)?,
            },
            WireOutbound::Write { id, path, op, hash } => OutboundMessage::Write {
                write_id: id,
                path: parse_path("path", &path)?,
                operation: op.try_into()?,
                precondition: hash,
            },
            WireOutbound::OnDisconnect { path, op } => OutboundMessage::OnDisconnect {
                path: parse_path("path", &path)?,
                operation: op.try_into()?,
            },
            WireOutbound::CancelOnDisconnect { path } => OutboundMessage::CancelOnDisconnect {
                path: parse_path("path", &path)?,
            },
        })
    }
}

impl From<&InboundMessage> for WireInbound {
    fn from(message: &InboundMessage) -> Self {
        match message {
            InboundMessage::Connected => WireInbound::Connected,
            InboundMessage::Disconnected => WireInbound::Disconnected,
            InboundMessage::ServerUpdate { path, node } => WireInbound::ServerUpdate {
                path: path.to_string(),
                data: node.to_json(),
            },
            InboundMessage::ServerMerge { path, merge } => WireInbound::ServerMerge {
                path: path.to_string(),
                data: export_merge(merge),
            },
            InboundMessage::QueryUpdate { query, node } => WireInbound::QueryUpdate {
                path: query.path.to_string(),
                filter: query.filter.as_str().to_string(),
                data: node.to_json(),
            },
            InboundMessage::QueryMerge { query, merge } => WireInbound::QueryMerge {
                path: query.path.to_string(),
                filter: query.filter.as_str().to_string(),
                data: export_merge(merge),
            },
            InboundMessage::ListenComplete { query } => WireInbound::ListenComplete {
                path: query.path.to_string(),
                filter: query.filter.as_str().to_string(),
            },
            InboundMessage::ListenRevoked { query, reason } => WireInbound::ListenRevoked {
                path: query.path.to_string(),
                filter: query.filter.as_str().to_string(),
                reason: reason.clone(),
            },
            InboundMessage::Ack {
                write_id,
                server_time,
            } => WireInbound::Ack {
                id: *write_id,
                server_time: *server_time,
            },
            InboundMessage::Revert { write_id, reason } => WireInbound::Revert {
                id: *write_id,
                status: reason.as_status().to_string(),
            },
        }
    }
}

impl TryFrom<WireInbound> for InboundMessage {
    type Error = ProtocolError;

    fn try_from(wire: WireInbound) -> ProtocolResult<Self> {
        Ok(match wire {
            WireInbound::Connected => InboundMessage::Connected,
            WireInbound::Disconnected => InboundMessage::Disconnected,
            WireInbound::ServerUpdate { path, data } => InboundMessage::ServerUpdate {
                path: parse_path("path", &path)?,
                node: parse_node("data", &data)?,
            },
            WireInbound::ServerMerge { path, data } => InboundMessage::ServerMerge {
                path: parse_path("path", &path)?,
                merge: parse_merge(&data)?,
            },
            WireInbound::QueryUpdate { path, filter, data } => InboundMessage::QueryUpdate {
                query: query(&path, filter)?,
                node: parse_node("data", &data)?,
            },
            WireInbound::QueryMerge { path, filter, data } => InboundMessage::QueryMerge {
                query: query(&path, filter)?,
                merge: parse_merge(&data)?,
            },
            WireInbound::ListenComplete { path, filter } => InboundMessage::ListenComplete {
                query: query(&path, filter)?,
            },
            WireInbound::ListenRevoked {
                path,
                filter,
                reason,
            } => InboundMessage::ListenRevoked {
                query: query(&path, filter)?,
                reason,
            },
            WireInbound::Ack { id, server_time } => {
                if server_time.is_some_and(|t| !t.is_finite()) {
                    return Err(ProtocolError::invalid_field("server_time", "must be finite"));
                }
                InboundMessage::Ack {
                    write_id: id,
                    server_time,
                }
            }
            WireInbound::Revert { id, status } => InboundMessage::Revert {
                write_id: id,
                reason: RevertReason::from_status(&status),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_rejects_bad_paths() {
        let wire = WireInbound::ServerUpdate {
            path: "/bad.key".into(),
            data: json!(1),
        };
        let err = InboundMessage::try_from(wire).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { ref field, .. } if field == "path"));
    }

    #[test]
    fn wire_rejects_overlapping_merge_writes() {
        let mut data = BTreeMap::new();
        data.insert("a".to_string(), json!(1));
        data.insert("a/b".to_string(), json!(2));
        let wire = WireOperation::Merge { data };
        assert!(Operation::try_from(wire).is_err());
    }

    #[test]
    fn kinds() {
        assert_eq!(InboundMessage::Connected.kind(), "connected");
        let msg = OutboundMessage::CancelOnDisconnect { path: Path::root() };
        assert_eq!(msg.kind(), "cancel_on_disconnect");
    }
}
