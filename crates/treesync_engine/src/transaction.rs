//! Transactions and write completion handles.
//!
//! A transaction runs a pure update function over the current effective
//! value of a path. Its result is applied optimistically as a write and sent
//! with the hash of the value it was computed from; the server rejects it as
//! stale if its own value hashes differently. A stale transaction is rerun
//! against the new value under a new write id, up to the configured bound.
//! An attempt that never reached the transport is also rerun locally when a
//! server push changes the value it was computed from.

use crate::error::SyncResult;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use treesync_core::{Node, Path, WriteId};

/// What an update function decided.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionUpdate {
    /// Write this value.
    Commit(Node),
    /// Give up without writing.
    Abort,
}

/// Final result of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    /// True if the server accepted the write; false if the update function aborted.
    pub committed: bool,
    /// Value at the path when the transaction finished.
    pub snapshot: Node,
}

/// Update function of a transaction.
pub type UpdateFn = Box<dyn FnMut(&Node) -> TransactionUpdate + Send>;

/// Completion handle of a write.
#[derive(Debug)]
pub struct PendingWriteHandle {
    /// Write id assigned to the write.
    pub write_id: WriteId,
    /// Resolves with `Ok(())` on ack or the mapped error on revert.
    pub completion: oneshot::Receiver<SyncResult<()>>,
}

impl PendingWriteHandle {
    /// Returns the outcome if the write has settled.
    pub fn try_result(&mut self) -> Option<SyncResult<()>> {
        settled(&mut self.completion)
    }
}

/// Completion handle of a transaction.
#[derive(Debug)]
pub struct TransactionHandle {
    /// Resolves once the transaction commits, aborts or fails.
    pub completion: oneshot::Receiver<SyncResult<TransactionOutcome>>,
}

impl TransactionHandle {
    /// Returns the outcome if the transaction has finished.
    pub fn try_result(&mut self) -> Option<SyncResult<TransactionOutcome>> {
        settled(&mut self.completion)
    }
}

fn settled<T>(rx: &mut oneshot::Receiver<T>) -> Option<T> {
    match rx.try_recv() {
        Ok(value) => Some(value),
        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
    }
}

/// A transaction waiting for the server.
pub(crate) struct Transaction {
    pub(crate) path: Path,
    pub(crate) update: UpdateFn,
    /// Id of the write carrying the current attempt.
    pub(crate) write_id: WriteId,
    pub(crate) retries: u32,
    /// Value the current attempt was computed from.
    pub(crate) base: Node,
    /// Speculative result of the current attempt.
    pub(crate) result: Node,
    /// Whether the current attempt reached the transport. Once it has, only
    /// the server decides whether it is stale.
    pub(crate) sent: bool,
    sender: Option<oneshot::Sender<SyncResult<TransactionOutcome>>>,
}

impl Transaction {
    pub(crate) fn new(path: Path, update: UpdateFn) -> (Self, TransactionHandle) {
        let (tx, rx) = oneshot::channel();
        let transaction = Self {
            path,
            update,
            write_id: 0,
            retries: 0,
            base: Node::empty(),
            result: Node::empty(),
            sent: false,
            sender: Some(tx),
        };
        (transaction, TransactionHandle { completion: rx })
    }

    /// Runs the update function against `base`.
    pub(crate) fn run(&mut self, base: &Node) -> TransactionUpdate {
        (self.update)(base)
    }

    /// Precondition hash sent with the current attempt.
    pub(crate) fn precondition(&self) -> String {
        self.base.hash()
    }

    pub(crate) fn complete(&mut self, result: SyncResult<TransactionOutcome>) {
        if let Some(sender) = self.sender.take() {
            // The caller may have dropped the handle.
            let _ = sender.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn handle_reports_completion_once() {
        let (mut transaction, mut handle) =
            Transaction::new(Path::root(), Box::new(|_| TransactionUpdate::Abort));
        assert!(handle.try_result().is_none());
        assert_eq!(transaction.run(&Node::empty()), TransactionUpdate::Abort);

        transaction.complete(Err(SyncError::TransactionAborted { retries: 1 }));
        transaction.complete(Ok(TransactionOutcome {
            committed: true,
            snapshot: Node::empty(),
        }));
        assert_eq!(
            handle.try_result(),
            Some(Err(SyncError::TransactionAborted { retries: 1 }))
        );
    }

    #[test]
    fn precondition_hashes_the_base() {
        let (mut transaction, _handle) = Transaction::new(
            Path::root(),
            Box::new(|base| TransactionUpdate::Commit(base.clone())),
        );
        transaction.base = Node::from(5);
        assert_eq!(transaction.precondition(), Node::from(5).hash());
    }
}
