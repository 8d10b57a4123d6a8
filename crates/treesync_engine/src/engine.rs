//! The sync engine: connection reconciler over the core stores.
//!
//! All state lives behind one lock. Every public operation takes it, mutates
//! the stores and recomputes the affected views. The resulting event batches
//! are queued before the lock is released and delivered after it, so sinks
//! may call back into the engine; events they cause are delivered after the
//! batch in hand.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::on_disconnect::OnDisconnectQueue;
use crate::state::{ConnectionState, EngineStats};
use crate::transaction::{
    PendingWriteHandle, Transaction, TransactionHandle, TransactionOutcome, TransactionUpdate,
};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};
use treesync_core::{
    compute, resolve_operation_against, EventBatch, EventQueue, EventSink, ListenMode,
    ListenerHandle, ListenerRegistry, ListenerState, MergeMap, Node, Operation, Path, Priority,
    QueryFilter, QuerySpec, SyncViews, ValueTree, WriteId, WriteOrigin, WriteTree,
};
use treesync_protocol::{FrameDecode, InboundMessage, RevertReason};

/// The sync engine.
///
/// Generic over the transport that carries outbound messages. Inbound
/// messages are fed through the `on_*` methods, [`SyncEngine::handle_message`]
/// or [`SyncEngine::handle_frame`].
pub struct SyncEngine<T: Transport> {
    transport: Arc<T>,
    inner: Mutex<Inner>,
    events: EventQueue,
}

struct Inner {
    config: EngineConfig,
    state: ConnectionState,
    /// Set when the transport reported it can never send again; cleared by
    /// the next connection.
    transport_closed: bool,
    server: ValueTree,
    writes: WriteTree,
    views: SyncViews,
    listeners: ListenerRegistry,
    on_disconnect: OnDisconnectQueue,
    transactions: BTreeMap<WriteId, Transaction>,
    completions: HashMap<WriteId, oneshot::Sender<SyncResult<()>>>,
    /// Batches produced by the current operation.
    outbox: Vec<EventBatch>,
    stats: EngineStats,
}

impl<T: Transport> SyncEngine<T> {
    /// Creates a disconnected engine.
    pub fn new(config: EngineConfig, transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            inner: Mutex::new(Inner {
                config,
                state: ConnectionState::Disconnected,
                transport_closed: false,
                server: ValueTree::new(),
                writes: WriteTree::new(),
                views: SyncViews::new(),
                listeners: ListenerRegistry::new(),
                on_disconnect: OnDisconnectQueue::new(),
                transactions: BTreeMap::new(),
                completions: HashMap::new(),
                outbox: Vec::new(),
                stats: EngineStats::default(),
            }),
            events: EventQueue::new(),
        }
    }

    /// Runs `f` under the lock, then delivers the events it produced.
    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner, &dyn Transport) -> R) -> R {
        let result = {
            let mut inner = self.inner.lock();
            let result = f(&mut inner, &*self.transport);
            self.events.enqueue(inner.outbox.drain(..));
            result
        };
        self.events.drain();
        result
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        let delivery = self.events.stats();
        let inner = self.inner.lock();
        EngineStats {
            events_delivered: delivery.events_delivered,
            sink_failures: delivery.sink_failures,
            ..inner.stats.clone()
        }
    }

    /// Returns the number of writes the server has not settled.
    pub fn pending_write_count(&self) -> usize {
        self.inner.lock().writes.len()
    }

    /// Returns the effective value at `path`.
    pub fn current_value(&self, path: &Path) -> Node {
        let inner = self.inner.lock();
        compute(&inner.server, &inner.writes, path)
    }

    /// Returns the state of a listener.
    pub fn listener_state(&self, handle: ListenerHandle) -> ListenerState {
        self.inner.lock().listeners.state(handle)
    }

    /// Returns the on-disconnect registrations, in order.
    pub fn on_disconnect_entries(&self) -> Vec<(Path, Operation)> {
        self.inner.lock().on_disconnect.entries().to_vec()
    }

    // ------------------------------------------------------------------
    // Application side
    // ------------------------------------------------------------------

    /// Registers a listener on `path` under `filter`.
    ///
    /// The listener receives its initial batch as soon as its view is
    /// complete, which may be during this call.
    pub fn subscribe(
        &self,
        path: Path,
        filter: QueryFilter,
        mode: ListenMode,
        sink: impl EventSink + 'static,
    ) -> SyncResult<ListenerHandle> {
        self.with_inner(|inner, transport| {
            path.validate(&inner.config.limits)?;
            let query = QuerySpec::new(path, filter);
            let first = !inner.listeners.has_query(&query);
            let state = if inner.listeners.is_query_active(&query) {
                ListenerState::Active
            } else {
                ListenerState::Subscribing
            };
            let handle = inner
                .listeners
                .add(query.clone(), mode, state, Box::new(sink));
            if first {
                inner.send_listen(transport, &query);
            }
            inner.notify_view(&query);
            Ok(handle)
        })
    }

    /// Removes a listener. Returns false if the handle is unknown.
    ///
    /// When the last listener of a query goes, its view is dropped, and so is
    /// server data no remaining listen or pending write needs.
    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.with_inner(|inner, transport| {
            let Some(query) = inner.listeners.remove(handle) else {
                return false;
            };
            if !inner.listeners.has_query(&query) {
                if inner.can_send() {
                    debug!(query = %query, "unlisten");
                    if let Err(e) = transport.send_unlisten(&query) {
                        inner.send_failed("unlisten", &e);
                    }
                }
                inner.release_query(&query);
            }
            true
        })
    }

    /// Issues a write.
    pub fn write(&self, path: Path, operation: Operation) -> SyncResult<PendingWriteHandle> {
        self.with_inner(|inner, transport| {
            inner.config.limits.check_operation(&path, &operation)?;
            let write_id = inner
                .writes
                .add(path.clone(), operation.clone(), WriteOrigin::User, true);
            inner.stats.writes_issued += 1;
            let (tx, rx) = oneshot::channel();
            inner.completions.insert(write_id, tx);
            debug!(write_id, path = %path, "local write");
            inner.send_write(transport, write_id, &path, &operation, None);
            inner.refresh(&[path]);
            Ok(PendingWriteHandle {
                write_id,
                completion: rx,
            })
        })
    }

    /// Replaces the value at `path`.
    pub fn set(&self, path: Path, node: Node) -> SyncResult<PendingWriteHandle> {
        self.write(path, Operation::Set(node))
    }

    /// Replaces the value and priority at `path`.
    pub fn set_with_priority(
        &self,
        path: Path,
        node: Node,
        priority: Priority,
    ) -> SyncResult<PendingWriteHandle> {
        self.write(path, Operation::Set(node.with_priority(priority)))
    }

    /// Replaces several children of `path` at once.
    pub fn update(&self, path: Path, merge: MergeMap) -> SyncResult<PendingWriteHandle> {
        self.write(path, Operation::merge(merge)?)
    }

    /// Removes the value at `path`.
    pub fn remove(&self, path: Path) -> SyncResult<PendingWriteHandle> {
        self.write(path, Operation::remove())
    }

    /// Changes only the priority at `path`.
    pub fn set_priority(&self, path: Path, priority: Priority) -> SyncResult<PendingWriteHandle> {
        self.write(path, Operation::SetPriority(priority))
    }

    /// Runs a transaction at `path`.
    ///
    /// `update` may be called several times: once now, again when the server
    /// rejects the attempt as stale, and again when a push changes the value
    /// of an attempt that has not been sent yet.
    pub fn run_transaction<F>(&self, path: Path, update: F) -> SyncResult<TransactionHandle>
    where
        F: FnMut(&Node) -> TransactionUpdate + Send + 'static,
    {
        self.with_inner(|inner, transport| {
            path.validate(&inner.config.limits)?;
            let (transaction, handle) = Transaction::new(path.clone(), Box::new(update));
            inner.start_transaction(transport, transaction);
            inner.refresh(&[path]);
            Ok(handle)
        })
    }

    /// Registers an operation for the server to run when this client disconnects.
    pub fn queue_on_disconnect(&self, path: Path, operation: Operation) -> SyncResult<()> {
        self.with_inner(|inner, transport| {
            inner.config.limits.check_operation(&path, &operation)?;
            if inner.can_send() {
                if let Err(e) = transport.send_on_disconnect(&path, &operation) {
                    inner.send_failed("on_disconnect", &e);
                }
            }
            inner.on_disconnect.queue(path, operation);
            Ok(())
        })
    }

    /// Forgets on-disconnect registrations at or below `path`.
    pub fn cancel_on_disconnect(&self, path: Path) -> SyncResult<()> {
        self.with_inner(|inner, transport| {
            path.validate(&inner.config.limits)?;
            let dropped = inner.on_disconnect.cancel(&path);
            debug!(path = %path, dropped, "cancel on-disconnect");
            if inner.can_send() {
                if let Err(e) = transport.send_cancel_on_disconnect(&path) {
                    inner.send_failed("cancel_on_disconnect", &e);
                }
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Transport side
    // ------------------------------------------------------------------

    /// The transport started connecting.
    pub fn on_connecting(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        inner.state = inner.state.transition(ConnectionState::Connecting)?;
        debug!("connecting");
        Ok(())
    }

    /// The connection is up: listens, pending writes and on-disconnect
    /// registrations are sent again, in that order.
    pub fn on_connected(&self) -> SyncResult<()> {
        self.with_inner(|inner, transport| {
            inner.state = inner.state.transition(ConnectionState::Connected)?;
            inner.transport_closed = false;
            inner.stats.connections += 1;
            debug!("connected");

            inner.listeners.mark_all_subscribing();
            for query in inner.listeners.queries() {
                inner.send_listen(transport, &query);
            }

            if inner.config.resend_writes_on_reconnect {
                let pending: Vec<(WriteId, Path, Operation)> = inner
                    .writes
                    .unacked()
                    .map(|w| (w.write_id, w.path.clone(), w.operation.clone()))
                    .collect();
                for (write_id, path, operation) in pending {
                    let precondition =
                        inner.transactions.get(&write_id).map(Transaction::precondition);
                    let sent = inner.send_write(
                        transport,
                        write_id,
                        &path,
                        &operation,
                        precondition.as_deref(),
                    );
                    if let Some(transaction) = inner.transactions.get_mut(&write_id) {
                        transaction.sent |= sent;
                    }
                }
            }

            let registrations = inner.on_disconnect.entries().to_vec();
            for (path, operation) in registrations {
                if !inner.can_send() {
                    break;
                }
                if let Err(e) = transport.send_on_disconnect(&path, &operation) {
                    inner.send_failed("on_disconnect", &e);
                }
            }
            Ok(())
        })
    }

    /// The connection dropped.
    pub fn on_disconnected(&self) -> SyncResult<()> {
        self.with_inner(|inner, _| {
            inner.state = inner.state.transition(ConnectionState::Disconnected)?;
            inner.transport_closed = false;
            debug!("disconnected");
            inner.listeners.mark_all_subscribing();
            if !inner.config.resend_writes_on_reconnect {
                inner.fail_unacked_writes();
            }
            Ok(())
        })
    }

    /// The server value at `path` is `node`.
    pub fn on_server_update(&self, path: Path, node: Node) -> SyncResult<()> {
        self.with_inner(|inner, transport| {
            trace!(path = %path, "server update");
            inner.server.apply_overwrite(&path, node);
            inner.after_server_change(transport, path);
            Ok(())
        })
    }

    /// New server values for several descendants of `path`.
    pub fn on_server_merge(&self, path: Path, merge: MergeMap) -> SyncResult<()> {
        self.with_inner(|inner, transport| {
            trace!(path = %path, entries = merge.len(), "server merge");
            inner.server.apply_merge(&path, &merge);
            inner.after_server_change(transport, path);
            Ok(())
        })
    }

    /// The server value selected by the listen on `path` under `filter` is
    /// `node`.
    ///
    /// Unfiltered data goes to the shared server cache; filtered data only
    /// reaches the views of that query.
    pub fn on_query_update(&self, path: Path, filter: QueryFilter, node: Node) -> SyncResult<()> {
        if filter.is_default() {
            return self.on_server_update(path, node);
        }
        let query = QuerySpec::new(path, filter);
        self.with_inner(|inner, _| {
            trace!(query = %query, "query update");
            if !inner.views.apply_query_overwrite(&query, node) {
                debug!(query = %query, "discarding data for unknown query");
                inner.stats.ignored_messages += 1;
                return Ok(());
            }
            inner.stats.server_updates += 1;
            inner.refresh(&[query.path]);
            Ok(())
        })
    }

    /// New values for several children selected by the listen on `path`
    /// under `filter`.
    pub fn on_query_merge(&self, path: Path, filter: QueryFilter, merge: MergeMap) -> SyncResult<()> {
        if filter.is_default() {
            return self.on_server_merge(path, merge);
        }
        let query = QuerySpec::new(path, filter);
        self.with_inner(|inner, _| {
            trace!(query = %query, entries = merge.len(), "query merge");
            if !inner.views.apply_query_merge(&query, &merge) {
                debug!(query = %query, "discarding data for unknown query");
                inner.stats.ignored_messages += 1;
                return Ok(());
            }
            inner.stats.server_updates += 1;
            inner.refresh(&[query.path]);
            Ok(())
        })
    }

    /// The server sent everything it has for the listen on `path` under `filter`.
    ///
    /// An unfiltered completion makes the shared server cache complete at
    /// `path`; a filtered one completes only that query's views.
    pub fn on_listen_complete(&self, path: Path, filter: QueryFilter) -> SyncResult<()> {
        let query = QuerySpec::new(path, filter);
        self.with_inner(|inner, _| {
            if !inner.listeners.has_query(&query) {
                debug!(query = %query, "discarding completion for unknown listen");
                inner.stats.ignored_messages += 1;
                return Ok(());
            }
            inner.listeners.mark_active(&query);
            if query.filter.is_default() {
                inner.server.mark_complete(&query.path);
            } else {
                inner.views.mark_query_complete(&query);
            }
            inner.refresh(&[query.path]);
            Ok(())
        })
    }

    /// The server will no longer serve the listen on `path` under `filter`.
    pub fn on_listen_revoked(&self, path: Path, filter: QueryFilter, reason: &str) -> SyncResult<()> {
        let query = QuerySpec::new(path, filter);
        self.with_inner(|inner, _| {
            let cancelled = inner.listeners.cancel(&query, reason);
            let removed = cancelled.len();
            warn!(query = %query, reason, removed, "listen revoked");
            inner.outbox.extend(cancelled);
            if removed == 0 {
                inner.stats.ignored_messages += 1;
            } else {
                inner.release_query(&query);
            }
            Ok(())
        })
    }

    /// The server applied a write.
    pub fn on_ack(&self, write_id: WriteId) -> SyncResult<()> {
        self.with_inner(|inner, _| inner.ack(write_id, None));
        Ok(())
    }

    /// The server applied a write at `server_time` (milliseconds).
    pub fn on_ack_with_server_time(&self, write_id: WriteId, server_time: f64) -> SyncResult<()> {
        self.with_inner(|inner, _| inner.ack(write_id, Some(server_time)));
        Ok(())
    }

    /// The server rejected a write.
    pub fn on_revert(&self, write_id: WriteId, reason: RevertReason) -> SyncResult<()> {
        self.with_inner(|inner, transport| inner.revert(transport, write_id, reason));
        Ok(())
    }

    /// Dispatches a decoded inbound message.
    pub fn handle_message(&self, message: InboundMessage) -> SyncResult<()> {
        trace!(kind = message.kind(), "inbound message");
        match message {
            InboundMessage::Connected => self.on_connected(),
            InboundMessage::Disconnected => self.on_disconnected(),
            InboundMessage::ServerUpdate { path, node } => self.on_server_update(path, node),
            InboundMessage::ServerMerge { path, merge } => self.on_server_merge(path, merge),
            InboundMessage::QueryUpdate { query, node } => {
                self.on_query_update(query.path, query.filter, node)
            }
            InboundMessage::QueryMerge { query, merge } => {
                self.on_query_merge(query.path, query.filter, merge)
            }
            InboundMessage::ListenComplete { query } => {
                self.on_listen_complete(query.path, query.filter)
            }
            InboundMessage::ListenRevoked { query, reason } => {
                self.on_listen_revoked(query.path, query.filter, &reason)
            }
            InboundMessage::Ack {
                write_id,
                server_time: Some(time),
            } => self.on_ack_with_server_time(write_id, time),
            InboundMessage::Ack { write_id, .. } => self.on_ack(write_id),
            InboundMessage::Revert { write_id, reason } => self.on_revert(write_id, reason),
        }
    }

    /// Decodes an inbound frame and dispatches it.
    pub fn handle_frame(&self, frame: &[u8]) -> SyncResult<()> {
        self.handle_message(InboundMessage::decode_frame(frame)?)
    }
}

impl Inner {
    fn can_send(&self) -> bool {
        self.state.is_connected() && !self.transport_closed
    }

    fn send_failed(&mut self, kind: &str, e: &SyncError) {
        if e.is_retryable() {
            warn!(kind, error = %e, "send failed; will retry on reconnect");
        } else {
            error!(kind, error = %e, "transport closed; holding messages until reconnect");
            self.transport_closed = true;
        }
        self.stats.failed_sends += 1;
    }

    fn send_listen(&mut self, transport: &dyn Transport, query: &QuerySpec) {
        if !self.can_send() {
            return;
        }
        debug!(query = %query, "listen");
        match transport.send_listen(query) {
            Ok(()) => self.stats.listens_sent += 1,
            Err(e) => self.send_failed("listen", &e),
        }
    }

    /// Sends a write; returns whether the transport took it.
    fn send_write(
        &mut self,
        transport: &dyn Transport,
        write_id: WriteId,
        path: &Path,
        operation: &Operation,
        precondition: Option<&str>,
    ) -> bool {
        if !self.can_send() {
            return false;
        }
        match transport.send_write(write_id, path, operation, precondition) {
            Ok(()) => true,
            Err(e) => {
                self.send_failed("write", &e);
                false
            }
        }
    }

    /// Computes the view of `query` if needed and queues its listeners' events.
    fn notify_view(&mut self, query: &QuerySpec) {
        let Inner {
            server,
            writes,
            views,
            listeners,
            outbox,
            ..
        } = self;
        let view = views.ensure(server, writes, query);
        outbox.extend(listeners.notify(query, view));
    }

    /// Recomputes the views overlapping `paths` and queues their events.
    fn refresh(&mut self, paths: &[Path]) {
        let mut changed = BTreeSet::new();
        for path in paths {
            changed.extend(self.views.refresh(&self.server, &self.writes, path));
        }
        for query in changed {
            if let Some(view) = self.views.get(&query) {
                self.outbox.extend(self.listeners.notify(&query, view));
            }
        }
    }

    /// Drops the view of a query nobody listens to any more.
    ///
    /// Unfiltered server data at its path is forgotten too, unless another
    /// listen still covers the path. Data under remaining listens and under
    /// pending writes is kept.
    fn release_query(&mut self, query: &QuerySpec) {
        self.views.remove(query);
        if !query.filter.is_default() || self.listeners.covers(&query.path) {
            return;
        }
        let mut keep = self.listeners.covered_below(&query.path);
        keep.extend(
            self.writes
                .get_pending_for(&query.path)
                .into_iter()
                .filter(|w| query.path.contains(&w.path))
                .map(|w| w.path.clone()),
        );
        debug!(path = %query.path, kept = keep.len(), "forgetting unlistened data");
        self.server.forget(&query.path, &keep);
    }

    fn after_server_change(&mut self, transport: &dyn Transport, path: Path) {
        self.stats.server_updates += 1;
        let mut touched = self.rerun_stale_transactions(transport, &path);
        touched.push(path);
        self.refresh(&touched);
    }

    /// Folds settled writes into the server cache; returns their paths.
    fn fold_settled(&mut self, drained: Vec<treesync_core::PendingWrite>) -> Vec<Path> {
        let mut touched = Vec::with_capacity(drained.len());
        for write in drained {
            let operation = resolve_operation_against(&write.path, &write.operation, self.server.root());
            trace!(write_id = write.write_id, path = %write.path, "fold acked write");
            self.server.apply_operation(&write.path, &operation);
            touched.push(write.path);
        }
        touched
    }

    fn ack(&mut self, write_id: WriteId, server_time: Option<f64>) {
        let path = self.writes.get(write_id).map(|w| w.path.clone());
        let Some(drained) = self.writes.ack(write_id, server_time) else {
            warn!(write_id, "ignoring ack for unknown write");
            self.stats.ignored_messages += 1;
            return;
        };
        debug!(write_id, drained = drained.len(), "write acked");
        self.stats.writes_acked += 1;
        let mut touched = self.fold_settled(drained);
        touched.extend(path);
        self.refresh(&touched);

        if let Some(sender) = self.completions.remove(&write_id) {
            let _ = sender.send(Ok(()));
        }
        if let Some(mut transaction) = self.transactions.remove(&write_id) {
            let snapshot = compute(&self.server, &self.writes, &transaction.path);
            transaction.complete(Ok(TransactionOutcome {
                committed: true,
                snapshot,
            }));
        }
    }

    fn revert(&mut self, transport: &dyn Transport, write_id: WriteId, reason: RevertReason) {
        let Some(write) = self.writes.revert(write_id) else {
            warn!(write_id, reason = %reason, "ignoring revert for unknown write");
            self.stats.ignored_messages += 1;
            return;
        };
        debug!(write_id, reason = %reason, "write reverted");
        self.stats.writes_reverted += 1;
        let drained = self.writes.drain_settled();
        let mut touched = self.fold_settled(drained);
        touched.push(write.path);

        if let Some(transaction) = self.transactions.remove(&write_id) {
            touched.push(transaction.path.clone());
            if reason == RevertReason::DataStale {
                self.retry_transaction(transport, transaction);
            } else {
                let mut transaction = transaction;
                transaction.complete(Err(SyncError::from_revert(&reason)));
            }
        } else if let Some(sender) = self.completions.remove(&write_id) {
            let _ = sender.send(Err(SyncError::from_revert(&reason)));
        }
        self.refresh(&touched);
    }

    fn fail_unacked_writes(&mut self) {
        let ids: Vec<WriteId> = self.writes.unacked().map(|w| w.write_id).collect();
        let mut touched = Vec::new();
        for write_id in ids {
            let Some(write) = self.writes.revert(write_id) else {
                continue;
            };
            self.stats.writes_reverted += 1;
            touched.push(write.path);
            if let Some(mut transaction) = self.transactions.remove(&write_id) {
                transaction.complete(Err(SyncError::Disconnected));
            } else if let Some(sender) = self.completions.remove(&write_id) {
                let _ = sender.send(Err(SyncError::Disconnected));
            }
        }
        let drained = self.writes.drain_settled();
        touched.extend(self.fold_settled(drained));
        self.refresh(&touched);
    }

    /// Runs the update function and, on commit, issues the attempt's write.
    fn start_transaction(&mut self, transport: &dyn Transport, mut transaction: Transaction) {
        let base = compute(&self.server, &self.writes, &transaction.path);
        let node = match transaction.run(&base) {
            TransactionUpdate::Commit(node) => node,
            TransactionUpdate::Abort => {
                debug!(path = %transaction.path, "transaction aborted by update function");
                transaction.complete(Ok(TransactionOutcome {
                    committed: false,
                    snapshot: base,
                }));
                return;
            }
        };
        if let Err(e) = self.config.limits.check_node(&transaction.path, &node) {
            transaction.complete(Err(e.into()));
            return;
        }
        let operation = Operation::Set(node.clone());
        let write_id = self.writes.add(
            transaction.path.clone(),
            operation.clone(),
            WriteOrigin::Transaction,
            self.config.apply_transactions_locally,
        );
        self.stats.writes_issued += 1;
        transaction.write_id = write_id;
        transaction.base = base;
        transaction.result = node;
        let precondition = transaction.precondition();
        debug!(write_id, path = %transaction.path, retries = transaction.retries, "transaction attempt");
        transaction.sent = self.send_write(
            transport,
            write_id,
            &transaction.path,
            &operation,
            Some(&precondition),
        );
        self.transactions.insert(write_id, transaction);
    }

    /// Reruns a transaction whose write is gone, or aborts it at the bound.
    fn retry_transaction(&mut self, transport: &dyn Transport, mut transaction: Transaction) {
        if transaction.retries >= self.config.max_transaction_retries {
            warn!(path = %transaction.path, retries = transaction.retries, "transaction gave up");
            self.stats.transactions_aborted += 1;
            let retries = transaction.retries;
            transaction.complete(Err(SyncError::TransactionAborted { retries }));
            return;
        }
        transaction.retries += 1;
        self.stats.transaction_retries += 1;
        self.start_transaction(transport, transaction);
    }

    /// Reruns unsent transactions whose base a server change invalidated.
    ///
    /// A sent attempt may already be applied on the server, so only a
    /// `datastale` revert reruns it. Returns the paths of rerun transactions.
    fn rerun_stale_transactions(&mut self, transport: &dyn Transport, changed: &Path) -> Vec<Path> {
        let stale: Vec<WriteId> = self
            .transactions
            .values()
            .filter(|t| !t.sent && t.path.overlaps(changed))
            .filter(|t| {
                let base = self
                    .writes
                    .apply_before(self.server.get(&t.path), &t.path, t.write_id);
                base != t.base
            })
            .map(|t| t.write_id)
            .collect();

        let mut touched = Vec::with_capacity(stale.len());
        for write_id in stale {
            let Some(transaction) = self.transactions.remove(&write_id) else {
                continue;
            };
            if self.writes.revert(write_id).is_none() {
                self.transactions.insert(write_id, transaction);
                continue;
            }
            debug!(write_id, path = %transaction.path, "unsent transaction base changed");
            touched.push(transaction.path.clone());
            self.retry_transaction(transport, transaction);
        }
        touched
    }
}

impl<T: Transport> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SyncEngine")
            .field("state", &inner.state)
            .field("pending_writes", &inner.writes.len())
            .field("listeners", &inner.listeners.len())
            .field("queued_batches", &self.events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use treesync_core::{ChannelSink, Event};
    use treesync_protocol::OutboundMessage;

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn engine() -> SyncEngine<MockTransport> {
        SyncEngine::new(EngineConfig::default(), MockTransport::new())
    }

    #[test]
    fn writes_are_not_sent_while_disconnected() {
        let engine = engine();
        engine.set(path("/a"), Node::from(1)).unwrap();
        assert!(engine.transport().sent().is_empty());
        assert_eq!(engine.current_value(&path("/a")), Node::from(1));
        assert_eq!(engine.pending_write_count(), 1);

        engine.on_connected().unwrap();
        assert_eq!(engine.transport().sent().len(), 1);
    }

    #[test]
    fn subscribe_twice_sends_one_listen() {
        let engine = engine();
        engine.on_connected().unwrap();
        let (a, _) = ChannelSink::new();
        let (b, _) = ChannelSink::new();
        let h1 = engine
            .subscribe(path("/x"), QueryFilter::default(), ListenMode::All, a)
            .unwrap();
        let h2 = engine
            .subscribe(path("/x"), QueryFilter::default(), ListenMode::All, b)
            .unwrap();
        let listens = engine
            .transport()
            .sent()
            .into_iter()
            .filter(|m| matches!(m, OutboundMessage::Listen { .. }))
            .count();
        assert_eq!(listens, 1);

        assert!(engine.unsubscribe(h1));
        assert!(engine.transport().sent().len() == 1);
        assert!(engine.unsubscribe(h2));
        assert!(matches!(
            engine.transport().sent().last(),
            Some(OutboundMessage::Unlisten { .. })
        ));
        assert!(!engine.unsubscribe(h2));
    }

    #[test]
    fn invalid_writes_fail_synchronously() {
        let engine = engine();
        let err = engine.set(path("/n"), Node::from(f64::NAN)).unwrap_err();
        assert!(matches!(err, SyncError::Core(_)));
        assert_eq!(engine.pending_write_count(), 0);
    }

    #[test]
    fn listen_complete_primes_listener() {
        let engine = engine();
        engine.on_connected().unwrap();
        let (sink, rx) = ChannelSink::new();
        let handle = engine
            .subscribe(path("/room"), QueryFilter::default(), ListenMode::Value, sink)
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.listener_state(handle), ListenerState::Subscribing);

        engine
            .on_listen_complete(path("/room"), QueryFilter::default())
            .unwrap();
        assert_eq!(engine.listener_state(handle), ListenerState::Active);
        match rx.try_recv() {
            Ok(Event::Value { node, .. }) => assert!(node.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let engine = engine();
        assert!(engine.on_disconnected().is_err());
        engine.on_connecting().unwrap();
        engine.on_connected().unwrap();
        assert!(matches!(
            engine.on_connecting(),
            Err(SyncError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn query_data_for_unknown_query_is_ignored() {
        let engine = engine();
        engine
            .on_query_update(path("/q"), QueryFilter::new("limitToFirst=2"), Node::from(1))
            .unwrap();
        assert_eq!(engine.stats().ignored_messages, 1);
        assert!(engine.current_value(&path("/q")).is_empty());

        // Unfiltered data goes to the shared cache.
        engine
            .on_query_update(path("/q"), QueryFilter::default(), Node::from(2))
            .unwrap();
        assert_eq!(engine.current_value(&path("/q")), Node::from(2));
    }
}
