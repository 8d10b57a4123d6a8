//! # treesync engine
//!
//! Connection reconciler for the treesync client.
//!
//! This crate provides:
//! - The sync engine that applies local writes optimistically and reconciles
//!   them with server acknowledgments, reverts and pushes
//! - Transactions with precondition hashes and bounded retries
//! - On-disconnect registrations replayed on every connection
//! - A transport abstraction with a recording mock and a framed transport
//!
//! ## Architecture
//!
//! The engine owns every store behind a single lock. Application calls
//! (`set`, `update`, `subscribe`, `run_transaction`) and transport callbacks
//! (`on_connected`, `on_ack`, `on_server_update`, ...) each take the lock,
//! mutate the stores, refresh the affected views and queue the resulting
//! events. Events are delivered once the lock is released, in the order they
//! were queued, so sinks may read from or write to the engine. Outbound
//! messages go through a [`Transport`] whose sends never block.
//!
//! ## Key Invariants
//!
//! - Writes are sent in write-id order, and resent in that order on reconnect
//! - Listens are reissued before pending writes on reconnect
//! - Every write completes exactly once: ack, revert or local failure
//! - A sent transaction attempt is rerun only when the server rejects it as
//!   stale; an unsent one is also rerun when a push changes its base
//! - Filtered listens never see unfiltered server data, and vice versa

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod framed;
mod on_disconnect;
mod state;
mod transaction;
mod transport;

pub use config::{EngineConfig, DEFAULT_MAX_TRANSACTION_RETRIES};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use framed::{ChannelFrameWriter, FrameWriteError, FrameWriter, FramedTransport};
pub use on_disconnect::OnDisconnectQueue;
pub use state::{ConnectionState, EngineStats};
pub use transaction::{
    PendingWriteHandle, TransactionHandle, TransactionOutcome, TransactionUpdate, UpdateFn,
};
pub use transport::{MockTransport, Transport};
