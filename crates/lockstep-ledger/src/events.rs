use serde::{Deserialize, Serialize};

use lockstep_core::{AccountId, Amount, ChainId, Hashlock, LockId, Preimage};

/// What happened to a lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LockEventKind {
    /// A lock was created on chain.
    Created {
        sender: AccountId,
        receiver: AccountId,
        amount: Amount,
        hashlock: Hashlock,
        timelock_ms: u64,
    },
    /// A lock was claimed; the secret is now public on chain.
    Claimed { secret: Preimage },
    /// A lock was refunded to its creator.
    Refunded,
    /// A lock passed its timelock unclaimed.
    Expired,
}

impl LockEventKind {
    /// Stable discriminant used for duplicate-delivery keying.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Claimed { .. } => "claimed",
            Self::Refunded => "refunded",
            Self::Expired => "expired",
        }
    }
}

/// Normalized lock event, tagged with the chain it was observed on.
///
/// Delivery downstream is at-least-once; consumers key idempotency on
/// `(lock_id, kind.key())`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEvent {
    pub chain: ChainId,
    pub lock_id: LockId,
    pub kind: LockEventKind,
}

impl LockEvent {
    /// Idempotency key for duplicate suppression.
    pub fn dedup_key(&self) -> (LockId, &'static str) {
        (self.lock_id.clone(), self.kind.key())
    }
}

/// A lock event together with the chain height it occurred at. The monitor
/// withholds it until the chain's confirmation depth has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedLockEvent {
    pub height: u64,
    pub event: LockEvent,
}
