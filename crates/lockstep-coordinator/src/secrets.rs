use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use lockstep_core::{ChainId, ChainSettings, HashAlgorithm, Hashlock, OrderId, Preimage};

use crate::error::CoordinatorError;

/// A master secret registered for an order, with its digest precomputed for
/// every configured chain at registration time.
#[derive(Debug, Clone)]
struct MasterEntry {
    master: Preimage,
    /// Per-chain hashlocks of the master secret.
    hashlocks: HashMap<ChainId, Hashlock>,
}

/// A secret observed revealed on chain.
#[derive(Debug, Clone, Copy)]
pub struct RevealedSecret {
    pub secret: Preimage,
    pub revealed_at: DateTime<Utc>,
}

/// Generates secrets and per-chain hashlocks, and caches secrets revealed by
/// on-chain claims.
///
/// Plaintext stays on the generating side until deliberately revealed in a
/// claim transaction; after that it is public chain data, so effect-once
/// semantics live in order/lock state, not in secrecy. Different chains
/// verify preimages under different digest functions, so every required
/// digest is computed up front and indexed back to its order.
pub struct SecretManager {
    /// Digest function per configured chain.
    algorithms: HashMap<ChainId, HashAlgorithm>,
    /// Master secrets by order, known only because this engine generated them.
    masters: DashMap<OrderId, MasterEntry>,
    /// Any per-chain digest (master or derived fill) back to its order.
    by_digest: DashMap<[u8; 32], OrderId>,
    /// Secrets made public by observed claims, keyed by the digest they opened.
    revealed: DashMap<[u8; 32], RevealedSecret>,
}

impl SecretManager {
    pub fn new(chains: &[ChainSettings]) -> Self {
        Self {
            algorithms: chains
                .iter()
                .map(|c| (c.chain_id.clone(), c.hash_algorithm))
                .collect(),
            masters: DashMap::new(),
            by_digest: DashMap::new(),
            revealed: DashMap::new(),
        }
    }

    /// Digest function for a configured chain.
    pub fn algorithm(&self, chain: &ChainId) -> Result<HashAlgorithm, CoordinatorError> {
        self.algorithms
            .get(chain)
            .copied()
            .ok_or_else(|| CoordinatorError::UnknownChain(chain.clone()))
    }

    /// Generate a cryptographically random 32-byte master secret.
    pub fn generate_master(&self) -> Preimage {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Preimage(bytes)
    }

    /// Hashlock of `secret` as verified on `chain`.
    pub fn hashlock_on(
        &self,
        chain: &ChainId,
        secret: &Preimage,
    ) -> Result<Hashlock, CoordinatorError> {
        Ok(Hashlock::commit(self.algorithm(chain)?, secret.as_bytes()))
    }

    /// Register an order's master secret: precompute its digest under every
    /// configured chain algorithm and index each back to the order.
    pub fn register(&self, order_id: OrderId, master: Preimage) {
        let hashlocks: HashMap<ChainId, Hashlock> = self
            .algorithms
            .iter()
            .map(|(chain, alg)| (chain.clone(), Hashlock::commit(*alg, master.as_bytes())))
            .collect();
        for hashlock in hashlocks.values() {
            self.by_digest.insert(hashlock.digest, order_id);
        }
        self.masters.insert(order_id, MasterEntry { master, hashlocks });
        tracing::debug!(order_id = %order_id, chains = self.algorithms.len(), "master secret registered");
    }

    /// The order's master hashlock as seen on `chain`, if this engine
    /// generated the order's secret.
    pub fn hashlock_for(&self, order_id: &OrderId, chain: &ChainId) -> Option<Hashlock> {
        self.masters
            .get(order_id)
            .and_then(|e| e.hashlocks.get(chain).copied())
    }

    /// Master secret for an order, available only on the generating side.
    pub fn master(&self, order_id: &OrderId) -> Option<Preimage> {
        self.masters.get(order_id).map(|e| e.master)
    }

    /// Derive the independent secret for fill number `index` of an order.
    ///
    /// `sha256(master || index_le)`; revealing one fill's secret does not
    /// expose any other fill's.
    pub fn derive_fill_secret(&self, order_id: &OrderId, index: u32) -> Option<Preimage> {
        let entry = self.masters.get(order_id)?;
        let mut hasher = Sha256::new();
        hasher.update(entry.master.as_bytes());
        hasher.update(index.to_le_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Some(Preimage(out))
    }

    /// Index an additional (per-fill) digest back to its order.
    pub fn index_digest(&self, digest: [u8; 32], order_id: OrderId) {
        self.by_digest.insert(digest, order_id);
    }

    /// Resolve a digest observed on chain to the order it belongs to.
    pub fn order_for_digest(&self, digest: &[u8; 32]) -> Option<OrderId> {
        self.by_digest.get(digest).map(|e| *e)
    }

    /// Record a secret revealed by an observed claim. Returns `true` on
    /// first observation, `false` for duplicates.
    pub fn observe_revealed(&self, hashlock: &Hashlock, secret: Preimage) -> bool {
        if !hashlock.matches(secret.as_bytes()) {
            // The chain accepted it, so this indicates a mis-normalized
            // event rather than a valid reveal; don't cache it.
            tracing::warn!(hashlock = %hashlock, "revealed secret does not open its hashlock");
            return false;
        }
        let first = !self.revealed.contains_key(&hashlock.digest);
        if first {
            self.revealed.insert(
                hashlock.digest,
                RevealedSecret {
                    secret,
                    revealed_at: Utc::now(),
                },
            );
            tracing::info!(hashlock = %hashlock, "secret revealed on chain");
        }
        first
    }

    /// A previously revealed secret for `digest`, if any.
    pub fn revealed(&self, digest: &[u8; 32]) -> Option<Preimage> {
        self.revealed.get(digest).map(|e| e.secret)
    }
}
