use lockstep_core::{AccountId, LockId};

/// Errors surfaced by ledger adapters.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("lock not found: {0}")]
    LockNotFound(LockId),

    #[error("invalid secret for lock {0}")]
    InvalidSecret(LockId),

    #[error("lock already claimed: {0}")]
    AlreadyClaimed(LockId),

    #[error("lock already refunded: {0}")]
    AlreadyRefunded(LockId),

    #[error("lock not yet expired: {0}")]
    NotExpired(LockId),

    #[error("lock expired, claim rejected: {0}")]
    LockExpired(LockId),

    #[error("insufficient balance for {account}: have {available}, need {required}")]
    InsufficientBalance {
        account: AccountId,
        available: u128,
        required: u128,
    },

    #[error("chain connection error: {0}")]
    Connection(String),

    #[error("chain call timed out: {0}")]
    Timeout(String),
}

impl LedgerError {
    /// Transient errors worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// Race losses: another actor already produced the same logical outcome.
    pub fn is_race_loss(&self) -> bool {
        matches!(self, Self::AlreadyClaimed(_) | Self::AlreadyRefunded(_))
    }
}
