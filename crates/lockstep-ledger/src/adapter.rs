use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lockstep_core::{AccountId, Amount, ChainId, Hashlock, LockId, LockState, Preimage};

use crate::error::LedgerError;
use crate::events::SequencedLockEvent;

/// Parameters for creating a new HTLC lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLockParams {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: Amount,
    pub hashlock: Hashlock,
    /// Absolute expiry, milliseconds since UNIX epoch.
    pub timelock_ms: u64,
}

impl NewLockParams {
    /// The deterministic id the lock will carry on this chain.
    pub fn lock_id(&self, chain: &ChainId) -> LockId {
        LockId::derive(chain, &self.receiver, &self.amount, &self.hashlock, self.timelock_ms)
    }
}

/// Point-in-time view of a lock as reported by the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub id: LockId,
    pub chain: ChainId,
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: Amount,
    pub hashlock: Hashlock,
    pub timelock_ms: u64,
    pub state: LockState,
    /// The revealed preimage, if the lock has been claimed.
    pub secret: Option<Preimage>,
    /// Chain height at which the lock was created.
    pub created_height: u64,
}

/// Proof that a state-changing call landed on chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub lock_id: LockId,
    /// Chain-specific transaction reference.
    pub tx_ref: String,
    pub confirmed_at: DateTime<Utc>,
}

/// Uniform capability surface over one chain's lock contract.
///
/// Implementations bridge the coordinator to a concrete ledger (NEAR-style,
/// Stellar-style, EVM-style, or the in-memory reference). Wallets, signing,
/// and RPC client construction live behind the implementation.
///
/// All calls are idempotent from the caller's view: `create_lock` derives a
/// deterministic lock id from its parameters, so a retried create resolves to
/// the existing lock instead of double-locking funds.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// The chain this adapter serves.
    fn chain_id(&self) -> &ChainId;

    /// Create an HTLC lock, or return the existing one for identical
    /// parameters.
    async fn create_lock(&self, params: NewLockParams) -> Result<LockSnapshot, LedgerError>;

    /// Claim a lock by presenting the hashlock preimage.
    ///
    /// Fails `InvalidSecret` on digest mismatch, `AlreadyClaimed` /
    /// `AlreadyRefunded` if the lock is terminal, `LockExpired` if the
    /// timelock has elapsed.
    async fn claim(&self, lock_id: &LockId, secret: &Preimage) -> Result<Receipt, LedgerError>;

    /// Refund an expired, unclaimed lock to its creator.
    ///
    /// Fails `NotExpired` before the timelock, `AlreadyClaimed` after a
    /// successful claim.
    async fn refund(&self, lock_id: &LockId) -> Result<Receipt, LedgerError>;

    /// Query the current state of a lock.
    async fn get_lock(&self, lock_id: &LockId) -> Result<LockSnapshot, LedgerError>;

    /// Current chain head height, for confirmation-depth accounting.
    async fn head_height(&self) -> Result<u64, LedgerError>;

    /// Lock events recorded strictly after `height`, oldest first.
    async fn events_since(&self, height: u64) -> Result<Vec<SequencedLockEvent>, LedgerError>;
}
