//! Configuration for the sync engine.

use treesync_core::ValidationLimits;

/// Default number of times a transaction is rerun before it aborts.
pub const DEFAULT_MAX_TRANSACTION_RETRIES: u32 = 25;

/// Configuration for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many times a transaction may be rerun before it aborts.
    pub max_transaction_retries: u32,
    /// Whether a transaction's speculative result is visible before the ack.
    pub apply_transactions_locally: bool,
    /// Limits applied to paths and values of local writes.
    pub limits: ValidationLimits,
    /// Whether unacknowledged writes are re-sent after a reconnect.
    ///
    /// When disabled, pending writes fail with
    /// [`SyncError::Disconnected`](crate::SyncError::Disconnected) as soon as
    /// the connection drops.
    pub resend_writes_on_reconnect: bool,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_transaction_retries: DEFAULT_MAX_TRANSACTION_RETRIES,
            apply_transactions_locally: true,
            limits: ValidationLimits::default(),
            resend_writes_on_reconnect: true,
        }
    }

    /// Sets the transaction retry bound.
    pub fn with_max_transaction_retries(mut self, retries: u32) -> Self {
        self.max_transaction_retries = retries;
        self
    }

    /// Sets whether transactions apply locally before the ack.
    pub fn with_apply_transactions_locally(mut self, apply: bool) -> Self {
        self.apply_transactions_locally = apply;
        self
    }

    /// Sets the validation limits.
    pub fn with_limits(mut self, limits: ValidationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets whether pending writes survive a disconnect.
    pub fn with_resend_writes_on_reconnect(mut self, resend: bool) -> Self {
        self.resend_writes_on_reconnect = resend;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
