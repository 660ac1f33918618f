use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use lockstep_core::{
    AccountId, Amount, Asset, ChainId, HashAlgorithm, LockId, LockState, Preimage,
};

use crate::adapter::{LedgerAdapter, LockSnapshot, NewLockParams, Receipt};
use crate::error::LedgerError;
use crate::events::{LockEvent, LockEventKind, SequencedLockEvent};

#[derive(Debug, Clone)]
struct StoredLock {
    sender: AccountId,
    receiver: AccountId,
    amount: Amount,
    hashlock: lockstep_core::Hashlock,
    timelock_ms: u64,
    state: LockState,
    secret: Option<Preimage>,
    created_height: u64,
}

/// In-memory reference ledger.
///
/// Behaves like a chain's lock contract with simulated block heights: every
/// state-changing call produces one block and one journal entry, and `mine`
/// advances the head so events mature past a monitor's confirmation depth.
/// Used as the test double for the adapter seam and as executable
/// documentation of the expected contract semantics.
pub struct InMemoryLedger {
    chain: ChainId,
    algorithm: HashAlgorithm,
    locks: DashMap<LockId, StoredLock>,
    /// Balance tracker: "account:asset" -> available units.
    balances: DashMap<String, u128>,
    journal: Mutex<Vec<SequencedLockEvent>>,
    height: AtomicU64,
    /// Pending injected transient failures, for retry tests.
    inject_failures: AtomicU32,
}

impl InMemoryLedger {
    pub fn new(chain: impl Into<ChainId>, algorithm: HashAlgorithm) -> Self {
        Self {
            chain: chain.into(),
            algorithm,
            locks: DashMap::new(),
            balances: DashMap::new(),
            journal: Mutex::new(Vec::new()),
            height: AtomicU64::new(0),
            inject_failures: AtomicU32::new(0),
        }
    }

    /// Digest function this chain verifies preimages with.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn balance_key(account: &AccountId, asset: &Asset) -> String {
        format!("{}:{}", account, asset)
    }

    /// Seed an account balance.
    pub fn credit(&self, account: &AccountId, amount: &Amount) {
        let key = Self::balance_key(account, &amount.asset);
        *self.balances.entry(key).or_insert(0) += amount.value;
    }

    /// Current balance for an account + asset pair.
    pub fn balance(&self, account: &AccountId, asset: &Asset) -> u128 {
        self.balances
            .get(&Self::balance_key(account, asset))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Make the next `n` calls fail with a transient connection error.
    pub fn inject_connection_failures(&self, n: u32) {
        self.inject_failures.store(n, Ordering::SeqCst);
    }

    fn check_injected(&self) -> Result<(), LedgerError> {
        let prev = self
            .inject_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .unwrap_or(0);
        if prev > 0 {
            return Err(LedgerError::Connection("injected failure".into()));
        }
        Ok(())
    }

    fn now_ms() -> u64 {
        Utc::now().timestamp_millis() as u64
    }

    fn next_height(&self) -> u64 {
        self.height.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record(&self, height: u64, lock_id: LockId, kind: LockEventKind) {
        self.journal.lock().unwrap().push(SequencedLockEvent {
            height,
            event: LockEvent {
                chain: self.chain.clone(),
                lock_id,
                kind,
            },
        });
    }

    /// Advance the head by `n` blocks. Block production also notices locks
    /// whose timelock has passed and journals their expiry.
    pub fn mine(&self, n: u64) {
        for _ in 0..n {
            let height = self.next_height();
            let now = Self::now_ms();
            for mut entry in self.locks.iter_mut() {
                let lock = entry.value_mut();
                if lock.state == LockState::Created && now >= lock.timelock_ms {
                    lock.state = LockState::Expired;
                    let id = entry.key().clone();
                    self.record(height, id, LockEventKind::Expired);
                }
            }
        }
    }

    fn snapshot(&self, id: &LockId, lock: &StoredLock) -> LockSnapshot {
        LockSnapshot {
            id: id.clone(),
            chain: self.chain.clone(),
            sender: lock.sender.clone(),
            receiver: lock.receiver.clone(),
            amount: lock.amount.clone(),
            hashlock: lock.hashlock,
            timelock_ms: lock.timelock_ms,
            state: lock.state,
            secret: lock.secret,
            created_height: lock.created_height,
        }
    }

    fn receipt(&self, lock_id: &LockId, height: u64) -> Receipt {
        Receipt {
            lock_id: lock_id.clone(),
            tx_ref: format!("{}-{:08}", self.chain, height),
            confirmed_at: Utc::now(),
        }
    }
}

#[async_trait]
impl LedgerAdapter for InMemoryLedger {
    fn chain_id(&self) -> &ChainId {
        &self.chain
    }

    async fn create_lock(&self, params: NewLockParams) -> Result<LockSnapshot, LedgerError> {
        self.check_injected()?;

        let id = params.lock_id(&self.chain);

        // Idempotent: a retried create resolves to the existing lock.
        if let Some(existing) = self.locks.get(&id) {
            tracing::debug!(lock_id = %id, chain = %self.chain, "create_lock hit existing lock");
            return Ok(self.snapshot(&id, existing.value()));
        }

        let key = Self::balance_key(&params.sender, &params.amount.asset);
        {
            let mut balance = self.balances.entry(key).or_insert(0);
            if *balance < params.amount.value {
                return Err(LedgerError::InsufficientBalance {
                    account: params.sender.clone(),
                    available: *balance,
                    required: params.amount.value,
                });
            }
            *balance -= params.amount.value;
        }

        let height = self.next_height();
        let lock = StoredLock {
            sender: params.sender.clone(),
            receiver: params.receiver.clone(),
            amount: params.amount.clone(),
            hashlock: params.hashlock,
            timelock_ms: params.timelock_ms,
            state: LockState::Created,
            secret: None,
            created_height: height,
        };
        let snapshot = self.snapshot(&id, &lock);
        self.locks.insert(id.clone(), lock);
        self.record(
            height,
            id.clone(),
            LockEventKind::Created {
                sender: params.sender,
                receiver: params.receiver,
                amount: params.amount,
                hashlock: params.hashlock,
                timelock_ms: params.timelock_ms,
            },
        );
        tracing::info!(lock_id = %id, chain = %self.chain, height, "lock created");
        Ok(snapshot)
    }

    async fn claim(&self, lock_id: &LockId, secret: &Preimage) -> Result<Receipt, LedgerError> {
        self.check_injected()?;

        let (receiver, amount) = {
            let mut entry = self
                .locks
                .get_mut(lock_id)
                .ok_or_else(|| LedgerError::LockNotFound(lock_id.clone()))?;
            let lock = entry.value_mut();

            match lock.state {
                LockState::Claimed => return Err(LedgerError::AlreadyClaimed(lock_id.clone())),
                LockState::Refunded => return Err(LedgerError::AlreadyRefunded(lock_id.clone())),
                LockState::Created | LockState::Expired => {}
            }

            if Self::now_ms() >= lock.timelock_ms {
                lock.state = LockState::Expired;
                return Err(LedgerError::LockExpired(lock_id.clone()));
            }

            if !lock.hashlock.matches(secret.as_bytes()) {
                return Err(LedgerError::InvalidSecret(lock_id.clone()));
            }

            lock.state = LockState::Claimed;
            lock.secret = Some(*secret);
            (lock.receiver.clone(), lock.amount.clone())
        };

        self.credit(&receiver, &amount);
        let height = self.next_height();
        self.record(height, lock_id.clone(), LockEventKind::Claimed { secret: *secret });
        tracing::info!(lock_id = %lock_id, chain = %self.chain, height, "lock claimed");
        Ok(self.receipt(lock_id, height))
    }

    async fn refund(&self, lock_id: &LockId) -> Result<Receipt, LedgerError> {
        self.check_injected()?;

        let (sender, amount) = {
            let mut entry = self
                .locks
                .get_mut(lock_id)
                .ok_or_else(|| LedgerError::LockNotFound(lock_id.clone()))?;
            let lock = entry.value_mut();

            match lock.state {
                LockState::Claimed => return Err(LedgerError::AlreadyClaimed(lock_id.clone())),
                LockState::Refunded => return Err(LedgerError::AlreadyRefunded(lock_id.clone())),
                LockState::Created | LockState::Expired => {}
            }

            if Self::now_ms() < lock.timelock_ms {
                return Err(LedgerError::NotExpired(lock_id.clone()));
            }

            lock.state = LockState::Refunded;
            (lock.sender.clone(), lock.amount.clone())
        };

        self.credit(&sender, &amount);
        let height = self.next_height();
        self.record(height, lock_id.clone(), LockEventKind::Refunded);
        tracing::info!(lock_id = %lock_id, chain = %self.chain, height, "lock refunded");
        Ok(self.receipt(lock_id, height))
    }

    async fn get_lock(&self, lock_id: &LockId) -> Result<LockSnapshot, LedgerError> {
        let entry = self
            .locks
            .get(lock_id)
            .ok_or_else(|| LedgerError::LockNotFound(lock_id.clone()))?;
        Ok(self.snapshot(lock_id, entry.value()))
    }

    async fn head_height(&self) -> Result<u64, LedgerError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn events_since(&self, height: u64) -> Result<Vec<SequencedLockEvent>, LedgerError> {
        Ok(self
            .journal
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.height > height)
            .cloned()
            .collect())
    }
}
