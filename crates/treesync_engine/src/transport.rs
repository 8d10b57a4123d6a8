//! Transport layer abstraction for outbound messages.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use treesync_core::{Operation, Path, QuerySpec, WriteId};
use treesync_protocol::OutboundMessage;

/// A transport carries the engine's outbound messages to the server.
///
/// Sends must enqueue and return immediately; the engine calls them while
/// holding its lock. A failed send is logged by the engine and the message is
/// sent again on the next `Connected`; after a non-retryable error the engine
/// sends nothing more until then. Inbound traffic flows the other way,
/// through the engine's `on_*` methods or [`SyncEngine::handle_frame`].
///
/// [`SyncEngine::handle_frame`]: crate::SyncEngine::handle_frame
pub trait Transport: Send + Sync {
    /// Starts a listen.
    fn send_listen(&self, query: &QuerySpec) -> SyncResult<()>;

    /// Stops a listen.
    fn send_unlisten(&self, query: &QuerySpec) -> SyncResult<()>;

    /// Sends a write, with a value hash the server must match for transactions.
    fn send_write(
        &self,
        write_id: WriteId,
        path: &Path,
        operation: &Operation,
        precondition: Option<&str>,
    ) -> SyncResult<()>;

    /// Registers an on-disconnect operation.
    fn send_on_disconnect(&self, path: &Path, operation: &Operation) -> SyncResult<()>;

    /// Forgets on-disconnect operations at or below `path`.
    fn send_cancel_on_disconnect(&self, path: &Path) -> SyncResult<()>;
}

/// A transport that records what it is asked to send.
#[derive(Debug, Default)]
pub struct MockTransport {
    failing: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns a copy of everything sent so far.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Returns and clears everything sent so far.
    pub fn take_sent(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    fn record(&self, message: OutboundMessage) -> SyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("mock transport is failing"));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

impl Transport for MockTransport {
    fn send_listen(&self, query: &QuerySpec) -> SyncResult<()> {
        self.record(OutboundMessage::Listen {
            query: query.clone(),
        })
    }

    fn send_unlisten(&self, query: &QuerySpec) -> SyncResult<()> {
        self.record(OutboundMessage::Unlisten {
            query: query.clone(),
        })
    }

    fn send_write(
        &self,
        write_id: WriteId,
        path: &Path,
        operation: &Operation,
        precondition: Option<&str>,
    ) -> SyncResult<()> {
        self.record(OutboundMessage::Write {
            write_id,
            path: path.clone(),
            operation: operation.clone(),
            precondition: precondition.map(str::to_string),
        })
    }

    fn send_on_disconnect(&self, path: &Path, operation: &Operation) -> SyncResult<()> {
        self.record(OutboundMessage::OnDisconnect {
            path: path.clone(),
            operation: operation.clone(),
        })
    }

    fn send_cancel_on_disconnect(&self, path: &Path) -> SyncResult<()> {
        self.record(OutboundMessage::CancelOnDisconnect { path: path.clone() })
    }
}
