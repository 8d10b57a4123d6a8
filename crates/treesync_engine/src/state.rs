//! Connection state machine and engine statistics.

use crate::error::{SyncError, SyncResult};

/// State of the connection as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,
    /// The transport is establishing a connection.
    Connecting,
    /// Connected; outbound messages are sent immediately.
    Connected,
}

impl ConnectionState {
    /// Returns true if outbound messages can be sent.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Returns true if the transport may move from this state to `next`.
    ///
    /// A transport may report `Connected` without announcing `Connecting` first.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Disconnected, ConnectionState::Connecting)
                | (ConnectionState::Disconnected, ConnectionState::Connected)
                | (ConnectionState::Connecting, ConnectionState::Connected)
                | (ConnectionState::Connecting, ConnectionState::Disconnected)
                | (ConnectionState::Connected, ConnectionState::Disconnected)
        )
    }

    /// Validates a transition and returns the new state.
    pub fn transition(self, next: ConnectionState) -> SyncResult<ConnectionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SyncError::InvalidStateTransition {
                from: format!("{self:?}"),
                to: format!("{next:?}"),
            })
        }
    }
}

/// Statistics about engine activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of times the connection came up.
    pub connections: u64,
    /// Local writes accepted (including transaction attempts).
    pub writes_issued: u64,
    /// Writes acknowledged by the server.
    pub writes_acked: u64,
    /// Writes reverted by the server or failed locally.
    pub writes_reverted: u64,
    /// Server pushes applied (updates and merges).
    pub server_updates: u64,
    /// Listens sent to the server.
    pub listens_sent: u64,
    /// Transaction reruns.
    pub transaction_retries: u64,
    /// Transactions that gave up.
    pub transactions_aborted: u64,
    /// Events delivered to sinks.
    pub events_delivered: u64,
    /// Sink deliveries that failed or panicked.
    pub sink_failures: u64,
    /// Acks, reverts and completions that matched nothing.
    pub ignored_messages: u64,
    /// Outbound sends the transport refused.
    pub failed_sends: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_lifecycle() {
        let state = ConnectionState::default();
        assert!(!state.is_connected());
        let state = state.transition(ConnectionState::Connecting).unwrap();
        let state = state.transition(ConnectionState::Connected).unwrap();
        assert!(state.is_connected());
        let state = state.transition(ConnectionState::Disconnected).unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn rejects_invalid_transitions() {
        assert!(matches!(
            ConnectionState::Connected.transition(ConnectionState::Connecting),
            Err(SyncError::InvalidStateTransition { .. })
        ));
        assert!(ConnectionState::Disconnected
            .transition(ConnectionState::Disconnected)
            .is_err());
        assert!(ConnectionState::Disconnected.can_transition_to(ConnectionState::Connected));
    }
}
