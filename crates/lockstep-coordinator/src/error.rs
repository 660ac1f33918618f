use thiserror::Error;

use lockstep_core::{ChainId, CoreError, LockId, OrderId};
use lockstep_ledger::LedgerError;

use crate::fills::FillError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fill(#[from] FillError),

    #[error("no adapter registered for chain {0}")]
    UnknownChain(ChainId),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("unknown lock {0}")]
    UnknownLock(LockId),

    #[error("protocol check failed: {0}")]
    ProtocolViolation(String),

    #[error("{operation} gave up after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: u32 },

    #[error("another action is in flight for order {0}")]
    ActionInFlight(OrderId),
}
