//! In-memory server for end-to-end tests.
//!
//! [`FakeServer`] answers the engine's outbound messages the way a real
//! backend would: it serves listens, checks transaction preconditions,
//! applies writes with a deterministic clock, and replays on-disconnect
//! operations when the client goes away.
//!
//! Filters are not evaluated: a filtered listen is served everything at its
//! path, tagged with its query.

use crate::fixtures::TestEngine;
use std::collections::BTreeSet;
use treesync_core::{
    resolve_operation_with_time, Node, Operation, Path, QuerySpec, ValueTree, WriteId,
};
use treesync_engine::SyncResult;
use treesync_protocol::{InboundMessage, OutboundMessage, RevertReason};

/// Upper bound on pump rounds before [`pump`] gives up.
const MAX_PUMP_ROUNDS: usize = 1000;

/// A single-client, in-memory server.
#[derive(Debug)]
pub struct FakeServer {
    data: ValueTree,
    clock: f64,
    listens: BTreeSet<QuerySpec>,
    on_disconnect: Vec<(Path, Operation)>,
    denied: Vec<Path>,
}

impl FakeServer {
    /// Creates an empty server whose clock starts at `start_time`.
    pub fn new(start_time: f64) -> Self {
        Self {
            data: ValueTree::new(),
            clock: start_time,
            listens: BTreeSet::new(),
            on_disconnect: Vec::new(),
            denied: Vec::new(),
        }
    }

    /// Returns the stored value at `path`.
    pub fn value(&self, path: &Path) -> Node {
        self.data.get(path)
    }

    /// Overwrites a value without any client involvement.
    ///
    /// Returns the pushes for the listens that see the change.
    pub fn set_external(&mut self, path: &Path, node: Node) -> Vec<InboundMessage> {
        self.data.apply_overwrite(path, node);
        self.pushes_for(path)
    }

    /// Rejects writes at or below `path` with `permission_denied`.
    pub fn deny_writes(&mut self, path: Path) {
        self.denied.push(path);
    }

    /// Returns the active listens.
    pub fn listens(&self) -> &BTreeSet<QuerySpec> {
        &self.listens
    }

    /// Returns the registered on-disconnect operations.
    pub fn on_disconnect_entries(&self) -> &[(Path, Operation)] {
        &self.on_disconnect
    }

    /// Answers one outbound message.
    pub fn handle(&mut self, message: &OutboundMessage) -> Vec<InboundMessage> {
        match message {
            OutboundMessage::Listen { query } => {
                self.listens.insert(query.clone());
                vec![
                    self.push(query),
                    InboundMessage::ListenComplete {
                        query: query.clone(),
                    },
                ]
            }
            OutboundMessage::Unlisten { query } => {
                self.listens.remove(query);
                Vec::new()
            }
            OutboundMessage::Write {
                write_id,
                path,
                operation,
                precondition,
            } => self.write(*write_id, path, operation, precondition.as_deref()),
            OutboundMessage::OnDisconnect { path, operation } => {
                self.on_disconnect.push((path.clone(), operation.clone()));
                Vec::new()
            }
            OutboundMessage::CancelOnDisconnect { path } => {
                self.on_disconnect.retain(|(at, _)| !path.contains(at));
                Vec::new()
            }
        }
    }

    /// Drops the client: listens end and on-disconnect operations run.
    pub fn disconnect(&mut self) {
        self.listens.clear();
        for (path, operation) in std::mem::take(&mut self.on_disconnect) {
            let operation = resolve_operation_with_time(&operation, self.tick());
            self.data.apply_operation(&path, &operation);
        }
    }

    fn tick(&mut self) -> f64 {
        let now = self.clock;
        self.clock += 1.0;
        now
    }

    fn write(
        &mut self,
        write_id: WriteId,
        path: &Path,
        operation: &Operation,
        precondition: Option<&str>,
    ) -> Vec<InboundMessage> {
        if self.denied.iter().any(|denied| denied.contains(path)) {
            return vec![InboundMessage::Revert {
                write_id,
                reason: RevertReason::PermissionDenied,
            }];
        }
        if let Some(expected) = precondition {
            if self.data.get(path).hash() != expected {
                return vec![InboundMessage::Revert {
                    write_id,
                    reason: RevertReason::DataStale,
                }];
            }
        }
        let now = self.tick();
        let operation = resolve_operation_with_time(operation, now);
        self.data.apply_operation(path, &operation);
        let mut replies = self.pushes_for(path);
        replies.push(InboundMessage::Ack {
            write_id,
            server_time: Some(now),
        });
        replies
    }

    /// Data for one listen: shared for unfiltered queries, tagged otherwise.
    fn push(&self, query: &QuerySpec) -> InboundMessage {
        let node = self.data.get(&query.path);
        if query.filter.is_default() {
            InboundMessage::ServerUpdate {
                path: query.path.clone(),
                node,
            }
        } else {
            InboundMessage::QueryUpdate {
                query: query.clone(),
                node,
            }
        }
    }

    fn pushes_for(&self, changed: &Path) -> Vec<InboundMessage> {
        let mut unfiltered = BTreeSet::new();
        self.listens
            .iter()
            .filter(|query| query.path.overlaps(changed))
            .filter(|query| !query.filter.is_default() || unfiltered.insert(&query.path))
            .map(|query| self.push(query))
            .collect()
    }
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new(1_000.0)
    }
}

/// Delivers messages between `engine` and `server` until both are quiet.
///
/// Returns the number of outbound messages the server handled.
pub fn pump(engine: &TestEngine, server: &mut FakeServer) -> SyncResult<usize> {
    let mut handled = 0;
    for _ in 0..MAX_PUMP_ROUNDS {
        let outbound = engine.transport().take_sent();
        if outbound.is_empty() {
            return Ok(handled);
        }
        for message in &outbound {
            handled += 1;
            for reply in server.handle(message) {
                engine.handle_message(reply)?;
            }
        }
    }
    Ok(handled)
}

/// Feeds server-originated messages to `engine`.
pub fn deliver(engine: &TestEngine, messages: Vec<InboundMessage>) -> SyncResult<()> {
    messages
        .into_iter()
        .try_for_each(|message| engine.handle_message(message))
}
