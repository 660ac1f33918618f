use dashmap::DashSet;
use std::collections::BTreeMap;
use std::sync::Mutex;

use lockstep_core::{LockId, OrderId};

/// A lock whose timelock has elapsed without reaching a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueLock {
    pub lock_id: LockId,
    pub order_id: OrderId,
    pub timelock_ms: u64,
}

/// Time-ordered index of outstanding locks and pending-order acceptance
/// deadlines.
///
/// `due_*` marks what it hands out as in flight, so a second scheduler
/// instance (or an overlapping tick) does not signal the same expiry twice;
/// `complete` clears the marker once the coordinator has settled the lock.
pub struct TimeoutScheduler {
    /// (timelock, lock id) -> owning order, ordered by expiry.
    locks: Mutex<BTreeMap<(u64, LockId), OrderId>>,
    /// (deadline, order id) for orders still awaiting a filler.
    acceptance: Mutex<BTreeMap<(u64, OrderId), ()>>,
    /// Locks currently being handled.
    in_flight: DashSet<LockId>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(BTreeMap::new()),
            acceptance: Mutex::new(BTreeMap::new()),
            in_flight: DashSet::new(),
        }
    }

    /// Start watching a lock's timelock.
    pub fn track_lock(&self, timelock_ms: u64, lock_id: LockId, order_id: OrderId) {
        self.locks
            .lock()
            .unwrap()
            .insert((timelock_ms, lock_id), order_id);
    }

    /// Stop watching a lock (it reached a terminal state on its own).
    pub fn untrack_lock(&self, timelock_ms: u64, lock_id: &LockId) {
        self.locks
            .lock()
            .unwrap()
            .remove(&(timelock_ms, lock_id.clone()));
        self.in_flight.remove(lock_id);
    }

    /// Start watching a pending order's acceptance deadline.
    pub fn track_acceptance(&self, deadline_ms: u64, order_id: OrderId) {
        self.acceptance
            .lock()
            .unwrap()
            .insert((deadline_ms, order_id), ());
    }

    pub fn untrack_acceptance(&self, deadline_ms: u64, order_id: &OrderId) {
        self.acceptance
            .lock()
            .unwrap()
            .remove(&(deadline_ms, *order_id));
    }

    /// Locks past expiry as of `now_ms`, excluding ones already in flight.
    /// Each returned lock is marked in flight until `complete` is called.
    pub fn due_locks(&self, now_ms: u64) -> Vec<DueLock> {
        let locks = self.locks.lock().unwrap();
        locks
            .iter()
            .take_while(|((timelock, _), _)| *timelock <= now_ms)
            .filter_map(|((timelock, lock_id), order_id)| {
                // insert returns false if already present.
                if self.in_flight.insert(lock_id.clone()) {
                    Some(DueLock {
                        lock_id: lock_id.clone(),
                        order_id: *order_id,
                        timelock_ms: *timelock,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Pending-order acceptance deadlines that have passed. Entries are
    /// removed as they are handed out; cancellation is idempotent downstream.
    pub fn due_acceptance(&self, now_ms: u64) -> Vec<OrderId> {
        let mut acceptance = self.acceptance.lock().unwrap();
        let mut due = Vec::new();
        acceptance.retain(|(deadline, id), _| {
            if *deadline <= now_ms {
                due.push(*id);
                false
            } else {
                true
            }
        });
        due
    }

    /// Expiry handling did not settle the lock; hand it back so a later
    /// tick signals it again.
    pub fn release(&self, due: &DueLock) {
        self.in_flight.remove(&due.lock_id);
    }

    /// The coordinator finished handling this lock's expiry.
    pub fn complete(&self, due: &DueLock) {
        self.locks
            .lock()
            .unwrap()
            .remove(&(due.timelock_ms, due.lock_id.clone()));
        self.in_flight.remove(&due.lock_id);
    }

    /// Number of locks currently tracked.
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

impl Default for TimeoutScheduler {
    fn default() -> Self {
        Self::new()
    }
}
