use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use lockstep_core::{
    Lock, LockId, LockRole, LockState, Order, OrderId, OrderSnapshot, OrderStatus, PartialFill,
    SafetyDeposit,
};

/// Durable, versioned record of an order and its child rows. The single
/// source of truth for transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order: Order,
    pub locks: Vec<Lock>,
    pub fills: Vec<PartialFill>,
    pub deposits: Vec<SafetyDeposit>,
    /// Unallocated portion of the source amount, the single authoritative
    /// counter partial fills decrement.
    pub remaining: u128,
    /// A chain call for this order is in flight; the per-order guard is
    /// released while it runs.
    pub action_in_flight: bool,
    /// Bumped on every committed mutation (optimistic concurrency).
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn new(order: Order) -> Self {
        let remaining = order.source_amount.value;
        Self {
            order,
            locks: Vec::new(),
            fills: Vec::new(),
            deposits: Vec::new(),
            remaining,
            action_in_flight: false,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn lock(&self, lock_id: &LockId) -> Option<&Lock> {
        self.locks.iter().find(|l| &l.id == lock_id)
    }

    pub fn lock_mut(&mut self, lock_id: &LockId) -> Option<&mut Lock> {
        self.locks.iter_mut().find(|l| &l.id == lock_id)
    }

    pub fn source_lock(&self) -> Option<&Lock> {
        self.locks.iter().find(|l| l.role == LockRole::Source)
    }

    pub fn dest_locks(&self) -> impl Iterator<Item = &Lock> {
        self.locks.iter().filter(|l| l.role == LockRole::Dest)
    }

    /// All destination legs exist and are claimed, and the source leg is
    /// claimed: the swap is complete.
    pub fn all_legs_claimed(&self) -> bool {
        let source_claimed = self
            .source_lock()
            .map(|l| l.state == LockState::Claimed)
            .unwrap_or(false);
        let dests: Vec<_> = self.dest_locks().collect();
        source_claimed
            && !dests.is_empty()
            && dests.iter().all(|l| l.state == LockState::Claimed)
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            order: self.order.clone(),
            locks: self.locks.clone(),
            fills: self.fills.clone(),
            deposits: self.deposits.clone(),
            version: self.version,
        }
    }
}

/// Store-level errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order not found: {0}")]
    NotFound(OrderId),

    #[error("order already exists: {0}")]
    AlreadyExists(OrderId),
}

/// Repository interface over order persistence.
///
/// All mutation goes through `update`, which serializes writers per order id
/// and bumps the record version; there is no process-wide mutable map to
/// reach around this interface.
pub trait OrderStore: Send + Sync {
    fn insert(&self, record: OrderRecord) -> Result<(), StoreError>;

    fn get(&self, id: &OrderId) -> Result<OrderRecord, StoreError>;

    /// Apply `mutate` to the record under the store's per-order write lock,
    /// bump the version, and return the committed record.
    fn update(
        &self,
        id: &OrderId,
        mutate: &mut dyn FnMut(&mut OrderRecord),
    ) -> Result<OrderRecord, StoreError>;

    /// Orders, optionally filtered by status.
    fn list(&self, status: Option<OrderStatus>) -> Vec<OrderRecord>;

    /// The order owning a lock, if any.
    fn find_by_lock(&self, lock_id: &LockId) -> Option<OrderId>;

    /// Try to take the per-order lease for `holder` until `expires_ms`.
    /// Returns `true` if acquired (or already held by `holder`). Used to
    /// prevent double-issuance when multiple coordinator instances run.
    fn try_lease(&self, id: &OrderId, holder: &str, expires_ms: u64, now_ms: u64) -> bool;

    fn release_lease(&self, id: &OrderId, holder: &str);
}

/// In-memory reference implementation of the repository.
pub struct InMemoryOrderStore {
    records: DashMap<OrderId, OrderRecord>,
    /// lock id -> owning order.
    lock_index: DashMap<LockId, OrderId>,
    /// order id -> (holder, lease expiry ms).
    leases: DashMap<OrderId, (String, u64)>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            lock_index: DashMap::new(),
            leases: DashMap::new(),
        }
    }

    fn reindex(&self, record: &OrderRecord) {
        for lock in &record.locks {
            self.lock_index.insert(lock.id.clone(), record.order.id);
        }
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn insert(&self, record: OrderRecord) -> Result<(), StoreError> {
        let id = record.order.id;
        if self.records.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        self.reindex(&record);
        self.records.insert(id, record);
        Ok(())
    }

    fn get(&self, id: &OrderId) -> Result<OrderRecord, StoreError> {
        self.records
            .get(id)
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound(*id))
    }

    fn update(
        &self,
        id: &OrderId,
        mutate: &mut dyn FnMut(&mut OrderRecord),
    ) -> Result<OrderRecord, StoreError> {
        let mut entry = self.records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        let record = entry.value_mut();
        mutate(record);
        record.version += 1;
        record.updated_at = Utc::now();
        let committed = record.clone();
        drop(entry);
        self.reindex(&committed);
        Ok(committed)
    }

    fn list(&self, status: Option<OrderStatus>) -> Vec<OrderRecord> {
        self.records
            .iter()
            .filter(|r| status.map_or(true, |s| r.order.status == s))
            .map(|r| r.clone())
            .collect()
    }

    fn find_by_lock(&self, lock_id: &LockId) -> Option<OrderId> {
        self.lock_index.get(lock_id).map(|e| *e)
    }

    fn try_lease(&self, id: &OrderId, holder: &str, expires_ms: u64, now_ms: u64) -> bool {
        let mut entry = self.leases.entry(*id).or_insert((holder.to_string(), expires_ms));
        let (current, expiry) = entry.value().clone();
        if current == holder || expiry <= now_ms {
            *entry.value_mut() = (holder.to_string(), expires_ms);
            true
        } else {
            false
        }
    }

    fn release_lease(&self, id: &OrderId, holder: &str) {
        self.leases.remove_if(id, |_, (current, _)| current == holder);
    }
}
