//! Error types for the sync engine.

use thiserror::Error;
use treesync_core::CoreError;
use treesync_protocol::{ProtocolError, RevertReason};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Structural errors ([`SyncError::Core`]) are returned synchronously by the
/// call that produced them. Server outcomes reach the caller through the
/// completion channel of the affected write or transaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Malformed path, value or operation.
    #[error("invalid input: {0}")]
    Core(#[from] CoreError),

    /// The server's security rules rejected the write.
    #[error("permission denied")]
    PermissionDenied,

    /// The write failed because the connection dropped.
    #[error("disconnected before the write was applied")]
    Disconnected,

    /// The write was canceled.
    #[error("write canceled")]
    WriteCanceled,

    /// A transaction was rerun too many times.
    #[error("transaction aborted after {retries} retries")]
    TransactionAborted {
        /// Number of reruns attempted.
        retries: u32,
    },

    /// The server rejected the write for another reason.
    #[error("server error: {0}")]
    UnknownError(String),

    /// The server revoked a listen.
    #[error("listen revoked: {0}")]
    ListenRevoked(String),

    /// Frame encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Invalid connection state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps a revert reason to the error reported to the writer.
    pub fn from_revert(reason: &RevertReason) -> Self {
        match reason {
            RevertReason::PermissionDenied => SyncError::PermissionDenied,
            RevertReason::Disconnect => SyncError::Disconnected,
            RevertReason::WriteCanceled => SyncError::WriteCanceled,
            other => SyncError::UnknownError(other.as_status().to_string()),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Disconnected | SyncError::NotConnected => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(!SyncError::PermissionDenied.is_retryable());
    }

    #[test]
    fn revert_reasons_map_to_errors() {
        assert_eq!(
            SyncError::from_revert(&RevertReason::PermissionDenied),
            SyncError::PermissionDenied
        );
        assert_eq!(
            SyncError::from_revert(&RevertReason::Disconnect),
            SyncError::Disconnected
        );
        assert_eq!(
            SyncError::from_revert(&RevertReason::WriteCanceled),
            SyncError::WriteCanceled
        );
        assert_eq!(
            SyncError::from_revert(&RevertReason::DataStale),
            SyncError::UnknownError("datastale".into())
        );
        assert_eq!(
            SyncError::from_revert(&RevertReason::Unknown("quota".into())),
            SyncError::UnknownError("quota".into())
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");
        let err = SyncError::TransactionAborted { retries: 25 };
        assert!(err.to_string().contains("25"));
    }
}
