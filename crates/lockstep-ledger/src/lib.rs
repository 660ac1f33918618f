//! Lockstep ledger layer.
//!
//! The `LedgerAdapter` trait is the uniform capability surface over one
//! chain's lock contract; `ChainMonitor` turns adapter observations into the
//! normalized, confirmation-gated event stream the coordinator consumes.

pub mod adapter;
pub mod adapters;
pub mod error;
pub mod events;
pub mod monitor;

pub use adapter::{LedgerAdapter, LockSnapshot, NewLockParams, Receipt};
pub use adapters::InMemoryLedger;
pub use error::LedgerError;
pub use events::{LockEvent, LockEventKind, SequencedLockEvent};
pub use monitor::ChainMonitor;
