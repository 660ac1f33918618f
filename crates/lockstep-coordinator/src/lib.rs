//! Lockstep coordination engine.
//!
//! Ties the order repository, secret manager, partial-fill allocator,
//! safety-deposit ledger and timeout scheduler together into the
//! `Coordinator`, which drives swap orders through their lifecycle from the
//! chain monitors' event stream.

pub mod coordinator;
pub mod deposits;
pub mod error;
pub mod fills;
pub mod scheduler;
pub mod secrets;
pub mod store;

pub use coordinator::{Coordinator, OrderNotification};
pub use deposits::SafetyDepositLedger;
pub use error::CoordinatorError;
pub use fills::{FillError, FillRequest, PartialFillAllocator};
pub use scheduler::{DueLock, TimeoutScheduler};
pub use secrets::SecretManager;
pub use store::{InMemoryOrderStore, OrderRecord, OrderStore, StoreError};
