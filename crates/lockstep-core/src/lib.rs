//! Lockstep core: shared types, the order state machine, and configuration
//! for the cross-chain swap coordination engine.

pub mod config;
pub mod error;
pub mod order;
pub mod state_machine;
pub mod types;

pub use config::{ChainSettings, CoordinatorConfig, FillSecretMode, ForfeitDestination, OrderLimits};
pub use error::CoreError;
pub use order::{
    DepositResolution, Lock, LockOrigin, LockRole, LockState, Order, OrderParams, OrderSnapshot,
    PartialFill, SafetyDeposit,
};
pub use state_machine::{OrderEvent, OrderStateMachine, OrderStatus, ReasonCode};
pub use types::{
    AccountId, Amount, Asset, ChainId, DepositId, FillId, HashAlgorithm, Hashlock, LockId,
    OrderId, Preimage,
};
