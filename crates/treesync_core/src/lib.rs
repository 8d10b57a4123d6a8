//! # treesync core
//!
//! Local state of a realtime tree-sync client.
//!
//! This crate provides:
//! - Immutable, structurally shared value nodes ([`Node`]) and validated paths
//! - The server cache ([`ValueTree`]) with completeness tracking
//! - The log of unacknowledged local writes ([`WriteTree`])
//! - Sync views that overlay pending writes on server state ([`SyncViews`])
//! - Event generation and the listener registry ([`ListenerRegistry`])
//! - Ordered event delivery outside the state lock ([`EventQueue`])
//!
//! ## Data flow
//!
//! A local write is appended to the write tree and becomes visible at once
//! in every overlapping view. The server later acknowledges it (the write is
//! folded into the server cache) or reverts it (the write is dropped and the
//! views fall back to the server value). Every change to a view is diffed
//! against what each listener last saw and delivered as one ordered batch.
//!
//! ## Key Invariants
//!
//! - Nodes never change; a container without children is the empty node
//! - Write ids are strictly increasing and define local write order
//! - Acknowledged writes fold into the server cache in write-id order
//! - A view's value depends only on the server cache, the data sent for its
//!   query and the write tree
//! - Batches reach a listener in the order the changes were made

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod json;
mod listener;
mod node;
mod operation;
mod path;
mod queue;
mod server_values;
mod tree;
mod validation;
mod view;
mod write_tree;

pub use error::{CoreError, CoreResult, SinkError};
pub use event::{diff, initial_events, Event, EventFilter, EventType};
pub use json::{priority_from_json, priority_to_json};
pub use listener::{
    ChannelSink, DeliveryStats, EventSink, ListenMode, ListenerHandle, ListenerRegistry,
    ListenerState, QueryFilter, QuerySpec,
};
pub use node::{compare_siblings, Leaf, Node, Priority};
pub use operation::{validate_merge_paths, MergeMap, Operation};
pub use path::{ChildKey, Path};
pub use queue::{EventBatch, EventQueue};
pub use server_values::{
    resolve_against, resolve_operation_against, resolve_operation_with_time, resolve_with_time,
};
pub use tree::ValueTree;
pub use validation::{
    ValidationLimits, MAX_KEY_BYTES, MAX_LEAF_BYTES, MAX_PATH_BYTES, MAX_PATH_DEPTH,
};
pub use view::{compute, is_complete, CacheNode, SyncViews};
pub use write_tree::{PendingWrite, WriteId, WriteOrigin, WriteTree};
