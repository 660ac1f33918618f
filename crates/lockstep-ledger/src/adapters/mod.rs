//! Concrete ledger adapters.
//!
//! Production chains (NEAR-style, Stellar-style, EVM-style) each get an
//! adapter crate of their own behind out-of-scope wallet/RPC collaborators;
//! this tree ships the in-memory reference adapter.

pub mod inmem;

pub use inmem::InMemoryLedger;
