//! Listener registry and event generation.
//!
//! Listeners are kept in registration order. Every recomputation of a view
//! produces one ordered batch per listener on that view. The registry only
//! builds the batches; they are delivered through an [`EventQueue`] once the
//! engine has released its lock.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (sink, events) = ChannelSink::new();
//! let handle = engine.subscribe(path, QueryFilter::default(), ListenMode::All, sink)?;
//!
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{:?}", event);
//!     }
//! });
//! ```
//!
//! [`EventQueue`]: crate::EventQueue

use crate::error::SinkError;
use crate::event::{diff, initial_events, Event, EventFilter};
use crate::node::Node;
use crate::path::Path;
use crate::queue::{EventBatch, SinkSlot};
use crate::view::CacheNode;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::debug;

/// Opaque query descriptor (ordering, limits, ranges) evaluated by the server.
///
/// The empty filter denotes the unfiltered query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFilter(String);

impl QueryFilter {
    /// Wraps a descriptor.
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    /// Returns the descriptor.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the unfiltered query.
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

/// A path plus a filter: the unit of transport subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySpec {
    /// Subscribed path.
    pub path: Path,
    /// Filter descriptor.
    pub filter: QueryFilter,
}

impl QuerySpec {
    /// Creates a query.
    pub fn new(path: Path, filter: QueryFilter) -> Self {
        Self { path, filter }
    }

    /// Creates the unfiltered query at `path`.
    pub fn default_at(path: Path) -> Self {
        Self::new(path, QueryFilter::default())
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filter.is_default() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}?{}", self.path, self.filter.as_str())
        }
    }
}

/// Which events a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    /// Only `value` events.
    Value,
    /// Only child events.
    Children,
    /// Both.
    All,
}

impl ListenMode {
    /// Returns the diff filter for this mode.
    pub fn event_filter(self) -> EventFilter {
        EventFilter {
            value: matches!(self, ListenMode::Value | ListenMode::All),
            children: matches!(self, ListenMode::Children | ListenMode::All),
        }
    }
}

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    /// Returns the raw handle value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Subscription state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Waiting for the server to confirm the listen.
    Subscribing,
    /// The server confirmed the listen.
    Active,
    /// Removed; receives nothing more.
    Unsubscribed,
}

/// Destination of a listener's events.
///
/// Sinks are called after the engine released its lock, so they may read
/// from or write to the engine. Events raised by such a call are delivered
/// after the current batch. A sink that returns an error or panics is isolated.
pub trait EventSink: Send {
    /// Receives one event.
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError>;
}

impl<F> EventSink for F
where
    F: FnMut(&Event) -> Result<(), SinkError> + Send,
{
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        self(event)
    }
}

/// Sink forwarding events to an mpsc channel.
pub struct ChannelSink {
    tx: Sender<Event>,
}

impl ChannelSink {
    /// Creates a sink and the receiver for its events.
    pub fn new() -> (Self, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .map_err(|_| SinkError::new("receiver dropped"))
    }
}

struct Listener {
    handle: ListenerHandle,
    query: QuerySpec,
    mode: ListenMode,
    state: ListenerState,
    primed: bool,
    last_emitted: Node,
    slot: Arc<SinkSlot>,
}

impl Listener {
    fn batch(&self, events: Vec<Event>) -> EventBatch {
        EventBatch::new(self.handle, Arc::clone(&self.slot), events)
    }
}

/// Counters for event delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events handed to sinks.
    pub events_delivered: u64,
    /// Deliveries that failed or panicked.
    pub sink_failures: u64,
}

/// All registered listeners, in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<Listener>,
    next_handle: u64,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener that has not received anything yet.
    pub fn add(
        &mut self,
        query: QuerySpec,
        mode: ListenMode,
        state: ListenerState,
        sink: Box<dyn EventSink>,
    ) -> ListenerHandle {
        self.next_handle += 1;
        let handle = ListenerHandle(self.next_handle);
        debug!(listener = %handle, query = %query, "listener added");
        self.listeners.push(Listener {
            handle,
            query,
            mode,
            state,
            primed: false,
            last_emitted: Node::empty(),
            slot: SinkSlot::new(sink),
        });
        handle
    }

    /// Removes a listener and returns its query.
    ///
    /// Batches already queued for the listener are dropped.
    pub fn remove(&mut self, handle: ListenerHandle) -> Option<QuerySpec> {
        let index = self.listeners.iter().position(|l| l.handle == handle)?;
        let listener = self.listeners.remove(index);
        listener.slot.detach();
        debug!(listener = %handle, query = %listener.query, "listener removed");
        Some(listener.query)
    }

    /// Returns the state of a listener; removed listeners report `Unsubscribed`.
    pub fn state(&self, handle: ListenerHandle) -> ListenerState {
        self.find(handle)
            .map(|l| l.state)
            .unwrap_or(ListenerState::Unsubscribed)
    }

    /// Returns true if the listener received its initial batch.
    pub fn is_primed(&self, handle: ListenerHandle) -> bool {
        self.find(handle).is_some_and(|l| l.primed)
    }

    /// Returns the query of a listener.
    pub fn query(&self, handle: ListenerHandle) -> Option<&QuerySpec> {
        self.find(handle).map(|l| &l.query)
    }

    fn find(&self, handle: ListenerHandle) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.handle == handle)
    }

    /// Returns true if any listener uses `query`.
    pub fn has_query(&self, query: &QuerySpec) -> bool {
        self.listeners.iter().any(|l| &l.query == query)
    }

    /// Returns true if any listener on `query` is active.
    pub fn is_query_active(&self, query: &QuerySpec) -> bool {
        self.listeners
            .iter()
            .any(|l| &l.query == query && l.state == ListenerState::Active)
    }

    /// Returns true if an unfiltered listener watches `path` or an ancestor.
    ///
    /// Such a listen keeps the shared server data at `path` current.
    pub fn covers(&self, path: &Path) -> bool {
        self.listeners
            .iter()
            .any(|l| l.query.filter.is_default() && l.query.path.contains(path))
    }

    /// Returns the paths of unfiltered listeners at or below `path`.
    pub fn covered_below(&self, path: &Path) -> Vec<Path> {
        let mut paths: Vec<Path> = Vec::new();
        for listener in &self.listeners {
            let at = &listener.query.path;
            if listener.query.filter.is_default() && path.contains(at) && !paths.contains(at) {
                paths.push(at.clone());
            }
        }
        paths
    }

    /// Returns the distinct queries, in order of first registration.
    pub fn queries(&self) -> Vec<QuerySpec> {
        let mut queries: Vec<QuerySpec> = Vec::new();
        for listener in &self.listeners {
            if !queries.contains(&listener.query) {
                queries.push(listener.query.clone());
            }
        }
        queries
    }

    /// Moves every listener back to `Subscribing`.
    pub fn mark_all_subscribing(&mut self) {
        for listener in &mut self.listeners {
            listener.state = ListenerState::Subscribing;
        }
    }

    /// Marks the listeners of `query` active; returns how many there are.
    pub fn mark_active(&mut self, query: &QuerySpec) -> usize {
        let mut count = 0;
        for listener in self.listeners.iter_mut().filter(|l| &l.query == query) {
            listener.state = ListenerState::Active;
            count += 1;
        }
        count
    }

    /// Builds the events produced by a new value of the view of `query`.
    ///
    /// Unprimed listeners get their initial batch once the view is complete;
    /// primed listeners get the diff against what they last saw.
    pub fn notify(&mut self, query: &QuerySpec, view: &CacheNode) -> Vec<EventBatch> {
        let mut batches = Vec::new();
        for listener in self.listeners.iter_mut().filter(|l| &l.query == query) {
            let filter = listener.mode.event_filter();
            let events = if listener.primed {
                diff(&query.path, &listener.last_emitted, &view.value, filter)
            } else if view.complete {
                listener.primed = true;
                initial_events(&query.path, &view.value, filter)
            } else {
                continue;
            };
            listener.last_emitted = view.value.clone();
            if !events.is_empty() {
                batches.push(listener.batch(events));
            }
        }
        batches
    }

    /// Removes the listeners of a revoked query.
    ///
    /// Returns one cancel event per removed listener.
    pub fn cancel(&mut self, query: &QuerySpec, reason: &str) -> Vec<EventBatch> {
        let (revoked, kept): (Vec<Listener>, Vec<Listener>) = std::mem::take(&mut self.listeners)
            .into_iter()
            .partition(|l| &l.query == query);
        self.listeners = kept;
        let event = Event::Cancel {
            path: query.path.clone(),
            reason: reason.to_string(),
        };
        revoked
            .iter()
            .map(|listener| listener.batch(vec![event.clone()]))
            .collect()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
