use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};

use lockstep_core::{
    AccountId, Amount, ChainId, CoordinatorConfig, CoreError, FillSecretMode, Hashlock, Lock, LockId,
    LockOrigin, LockRole, LockState, Order, OrderEvent, OrderId, OrderParams, OrderSnapshot,
    OrderStateMachine, OrderStatus, PartialFill, Preimage, ReasonCode, SafetyDeposit,
};
use lockstep_ledger::{LedgerAdapter, LockEvent, LockEventKind, NewLockParams};

use crate::deposits::SafetyDepositLedger;
use crate::error::CoordinatorError;
use crate::fills::{FillRequest, PartialFillAllocator};
use crate::scheduler::TimeoutScheduler;
use crate::secrets::SecretManager;
use crate::store::{OrderRecord, OrderStore};

/// Broadcast when an order's status changes.
#[derive(Debug, Clone)]
pub struct OrderNotification {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub reason: Option<ReasonCode>,
}

/// The swap coordination engine.
///
/// Owns the order repository, the secret manager, the safety-deposit ledger
/// and the timeout scheduler, and drives orders through their lifecycle from
/// the normalized event stream the chain monitors produce. One instance per
/// process; all chain access goes through registered `LedgerAdapter`s.
///
/// Event delivery is at-least-once; `handle_event` dedupes on
/// `(lock_id, kind)`. Chain calls never run under a per-order guard: the
/// guard covers the read-validate-commit window, the record's
/// `action_in_flight` marker covers the call itself.
pub struct Coordinator {
    config: CoordinatorConfig,
    adapters: HashMap<ChainId, Arc<dyn LedgerAdapter>>,
    store: Arc<dyn OrderStore>,
    secrets: SecretManager,
    deposits: SafetyDepositLedger,
    scheduler: TimeoutScheduler,
    /// Serializes local mutators (fill acceptance, expiry handling) per order.
    guards: DashMap<OrderId, Arc<Mutex<()>>>,
    /// Duplicate-delivery suppression for the event stream.
    seen: DashSet<(LockId, &'static str)>,
    notify_tx: broadcast::Sender<OrderNotification>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, store: Arc<dyn OrderStore>) -> Self {
        let secrets = SecretManager::new(&config.chains);
        let deposits = SafetyDepositLedger::new(config.forfeit_destination.clone());
        let (notify_tx, _) = broadcast::channel(256);
        Self {
            config,
            adapters: HashMap::new(),
            store,
            secrets,
            deposits,
            scheduler: TimeoutScheduler::new(),
            guards: DashMap::new(),
            seen: DashSet::new(),
            notify_tx,
        }
    }

    /// Register the adapter for one chain. Must be called for every chain in
    /// the config before orders are submitted.
    pub fn register_adapter(&mut self, adapter: Arc<dyn LedgerAdapter>) {
        self.adapters.insert(adapter.chain_id().clone(), adapter);
    }

    /// Status-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<OrderNotification> {
        self.notify_tx.subscribe()
    }

    pub fn get_order(&self, order_id: &OrderId) -> Result<OrderSnapshot, CoordinatorError> {
        Ok(self.store.get(order_id)?.snapshot())
    }

    pub fn list_orders(&self, status: Option<OrderStatus>) -> Vec<OrderSnapshot> {
        self.store.list(status).iter().map(|r| r.snapshot()).collect()
    }

    /// Validate and admit a new swap order.
    ///
    /// Generates the order's master secret, commits to it under the source
    /// chain's digest function, and starts the acceptance-window clock. No
    /// funds move here.
    pub fn submit_order(&self, params: OrderParams) -> Result<OrderSnapshot, CoordinatorError> {
        self.adapter(&params.source_chain)?;
        self.adapter(&params.dest_chain)?;

        let master = self.secrets.generate_master();
        let hashlock = self.secrets.hashlock_on(&params.source_chain, &master)?;
        let order = Order::create(params, hashlock, &self.config.limits, Self::now_ms())?;
        let order_id = order.id;
        self.secrets.register(order_id, master);

        let record = OrderRecord::new(order);
        let snapshot = record.snapshot();
        self.store.insert(record)?;
        self.scheduler
            .track_acceptance(self.acceptance_deadline(&snapshot.order), order_id);

        tracing::info!(
            order_id = %order_id,
            source_chain = %snapshot.order.source_chain,
            dest_chain = %snapshot.order.dest_chain,
            amount = snapshot.order.source_amount.value,
            "order submitted"
        );
        Ok(snapshot)
    }

    /// Create the source-chain lock for an order: the initiator's funds,
    /// claimable by `receiver` against the order hashlock.
    pub async fn lock_source(
        &self,
        order_id: &OrderId,
        receiver: &AccountId,
    ) -> Result<OrderSnapshot, CoordinatorError> {
        let record = self.store.get(order_id)?;
        let order = record.order.clone();
        let adapter = self.adapter(&order.source_chain)?.clone();

        let params = NewLockParams {
            sender: order.initiator.clone(),
            receiver: receiver.clone(),
            amount: order.source_amount.clone(),
            hashlock: order.hashlock,
            timelock_ms: order.timelock_source_ms,
        };

        {
            let guard = self.guard(order_id);
            let _permit = guard.lock().await;
            let record = self.store.get(order_id)?;
            if record.action_in_flight {
                return Err(CoordinatorError::ActionInFlight(*order_id));
            }
            self.store
                .update(order_id, &mut |r| r.action_in_flight = true)?;
        }

        let created = self
            .with_retry("create_lock", || {
                let adapter = adapter.clone();
                let params = params.clone();
                async move { adapter.create_lock(params).await }
            })
            .await;

        let snapshot = match created {
            Ok(snap) => snap,
            Err(e) => {
                self.store
                    .update(order_id, &mut |r| r.action_in_flight = false)?;
                return Err(e);
            }
        };

        let committed = self.store.update(order_id, &mut |r| {
            r.action_in_flight = false;
            if r.lock(&snapshot.id).is_none() {
                r.locks.push(Lock {
                    id: snapshot.id.clone(),
                    chain: order.source_chain.clone(),
                    role: LockRole::Source,
                    amount: order.source_amount.clone(),
                    hashlock: order.hashlock,
                    timelock_ms: order.timelock_source_ms,
                    state: LockState::Created,
                    secret: None,
                    origin: LockOrigin::Local,
                });
            }
            apply(r, OrderEvent::SourceLockConfirmed, None);
        })?;

        self.scheduler
            .track_lock(order.timelock_source_ms, snapshot.id.clone(), *order_id);
        self.scheduler
            .untrack_acceptance(self.acceptance_deadline(&order), order_id);
        self.notify(&committed);
        Ok(committed.snapshot())
    }

    /// Accept a resolver's fill and create the destination lock backing it.
    ///
    /// Acceptance (authorization, minimum fill, remaining-amount bookkeeping,
    /// deposit) commits atomically under the per-order guard; the chain call
    /// runs afterwards with the guard released, and the allocation is rolled
    /// back if the lock cannot be created.
    pub async fn submit_fill(
        &self,
        order_id: &OrderId,
        request: FillRequest,
    ) -> Result<PartialFill, CoordinatorError> {
        let guard = self.guard(order_id);
        let permit = guard.lock().await;

        let record = self.store.get(order_id)?;
        let order = record.order.clone();
        let adapter = self.adapter(&order.dest_chain)?.clone();
        let fill_index = record.fills.len() as u32;
        let hashlock = self.fill_hashlock(&order, fill_index)?;
        let Some(prorated) = prorated_dest_value(&order, request.amount) else {
            return Err(CoreError::InvalidAmount(
                "fill proration overflows the destination amount".into(),
            )
            .into());
        };

        let mut outcome: Option<Result<PartialFill, crate::fills::FillError>> = None;
        self.store.update(order_id, &mut |r| {
            let result = PartialFillAllocator::allocate(r, &request, hashlock, &self.config);
            if let Ok(fill) = &result {
                r.deposits.push(SafetyDeposit {
                    id: lockstep_core::DepositId::new(),
                    order_id: *order_id,
                    fill_id: fill.id,
                    poster: request.filler.clone(),
                    amount: request.deposit,
                    resolution: None,
                    created_at: chrono::Utc::now(),
                });
                r.action_in_flight = true;
            }
            outcome = Some(result);
        })?;
        let fill = match outcome {
            Some(Ok(fill)) => fill,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(crate::store::StoreError::NotFound(*order_id).into()),
        };
        self.secrets.index_digest(hashlock.digest, *order_id);
        drop(permit);

        let dest_amount = Amount::new(prorated, order.dest_amount.asset.clone());
        let params = NewLockParams {
            sender: request.filler.clone(),
            receiver: order.beneficiary.clone(),
            amount: dest_amount.clone(),
            hashlock,
            timelock_ms: order.timelock_dest_ms,
        };

        let created = self
            .with_retry("create_lock", || {
                let adapter = adapter.clone();
                let params = params.clone();
                async move { adapter.create_lock(params).await }
            })
            .await;

        let snapshot = match created {
            Ok(snap) => snap,
            Err(e) => {
                // Put the allocated amount back; the fill never existed.
                self.store.update(order_id, &mut |r| {
                    r.remaining += fill.amount;
                    r.fills.retain(|f| f.id != fill.id);
                    r.deposits.retain(|d| d.fill_id != fill.id);
                    r.action_in_flight = false;
                })?;
                tracing::warn!(order_id = %order_id, error = %e, "destination lock failed, fill rolled back");
                return Err(e);
            }
        };

        let committed = self.store.update(order_id, &mut |r| {
            r.action_in_flight = false;
            if r.lock(&snapshot.id).is_none() {
                r.locks.push(Lock {
                    id: snapshot.id.clone(),
                    chain: order.dest_chain.clone(),
                    role: LockRole::Dest,
                    amount: dest_amount.clone(),
                    hashlock,
                    timelock_ms: order.timelock_dest_ms,
                    state: LockState::Created,
                    secret: None,
                    origin: LockOrigin::Local,
                });
            }
            if let Some(f) = r.fills.iter_mut().find(|f| f.id == fill.id) {
                f.lock_id = Some(snapshot.id.clone());
            }
            apply(r, OrderEvent::DestLockCreated, None);
        })?;

        self.scheduler
            .track_lock(order.timelock_dest_ms, snapshot.id.clone(), *order_id);
        self.notify(&committed);

        Ok(committed
            .fills
            .iter()
            .find(|f| f.id == fill.id)
            .cloned()
            .unwrap_or(fill))
    }

    /// Claim a fill's destination lock on the beneficiary's behalf. This is
    /// the step that reveals the fill's secret on chain.
    pub async fn claim_destination(
        &self,
        order_id: &OrderId,
        fill_id: &lockstep_core::FillId,
    ) -> Result<(), CoordinatorError> {
        let record = self.store.get(order_id)?;
        let fill = record
            .fills
            .iter()
            .position(|f| &f.id == fill_id)
            .map(|index| (index as u32, record.fills[index].clone()))
            .ok_or_else(|| CoordinatorError::ProtocolViolation(format!("no fill {fill_id}")))?;
        let (fill_index, fill) = fill;
        let lock_id = fill
            .lock_id
            .clone()
            .ok_or_else(|| CoordinatorError::ProtocolViolation("fill has no destination lock".into()))?;
        let Some(lock) = record.lock(&lock_id).cloned() else {
            return Err(CoordinatorError::UnknownLock(lock_id));
        };
        if lock.state == LockState::Claimed {
            return Ok(());
        }

        let secret = match self.config.fill_secret_mode {
            FillSecretMode::SharedHashlock => self.secrets.master(order_id),
            FillSecretMode::PerFillDerived => self.secrets.derive_fill_secret(order_id, fill_index),
        }
        .ok_or(CoordinatorError::UnknownOrder(*order_id))?;

        let adapter = self.adapter(&lock.chain)?.clone();
        let claim = self
            .with_retry("claim", || {
                let adapter = adapter.clone();
                let lock_id = lock.id.clone();
                async move { adapter.claim(&lock_id, &secret).await }
            })
            .await;
        match claim {
            Ok(_) => {}
            Err(CoordinatorError::Ledger(e)) if e.is_race_loss() => {}
            Err(CoordinatorError::RetriesExhausted { .. }) => {
                return self.mark_stuck(order_id, ReasonCode::RetriesExhausted);
            }
            Err(e) => return Err(e),
        }
        self.record_claim(order_id, &lock, secret).await
    }

    /// Process one normalized lock event. Duplicate deliveries of the same
    /// `(lock, kind)` are no-ops.
    pub async fn handle_event(&self, event: LockEvent) -> Result<(), CoordinatorError> {
        if !self.seen.insert(event.dedup_key()) {
            tracing::trace!(lock_id = %event.lock_id, kind = event.kind.key(), "duplicate event dropped");
            return Ok(());
        }
        match event.kind {
            LockEventKind::Created {
                amount,
                hashlock,
                timelock_ms,
                ..
            } => {
                self.on_lock_created(&event.chain, &event.lock_id, amount, hashlock, timelock_ms)
                    .await
            }
            LockEventKind::Claimed { secret } => self.on_lock_claimed(&event.lock_id, secret).await,
            LockEventKind::Refunded => self.on_lock_refunded(&event.lock_id),
            LockEventKind::Expired => {
                let Some(order_id) = self.store.find_by_lock(&event.lock_id) else {
                    return Ok(());
                };
                self.resolve_expired_lock(&order_id, &event.lock_id).await
            }
        }
    }

    /// One scheduler pass: expired locks, then lapsed acceptance windows.
    pub async fn tick(&self, now_ms: u64) {
        for due in self.scheduler.due_locks(now_ms) {
            match self.resolve_expired_lock(&due.order_id, &due.lock_id).await {
                Ok(()) => self.scheduler.complete(&due),
                Err(e) => {
                    tracing::warn!(order_id = %due.order_id, lock_id = %due.lock_id, error = %e, "expiry handling failed");
                    self.scheduler.release(&due);
                }
            }
        }
        for order_id in self.scheduler.due_acceptance(now_ms) {
            if let Err(e) = self.cancel_unaccepted(&order_id) {
                tracing::warn!(order_id = %order_id, error = %e, "acceptance cancel failed");
            }
        }
    }

    /// Event/ticker loop. Runs until `shutdown` flips to true or the event
    /// channel closes.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<LockEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("coordinator shutting down");
                        break;
                    }
                }
                maybe = events.recv() => match maybe {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            tracing::warn!(error = %e, "event handling failed");
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.tick(Self::now_ms()).await,
            }
        }
    }

    async fn on_lock_created(
        &self,
        chain: &ChainId,
        lock_id: &LockId,
        amount: Amount,
        hashlock: Hashlock,
        timelock_ms: u64,
    ) -> Result<(), CoordinatorError> {
        let order_id = self
            .store
            .find_by_lock(lock_id)
            .or_else(|| self.secrets.order_for_digest(&hashlock.digest));
        let Some(order_id) = order_id else {
            tracing::debug!(lock_id = %lock_id, chain = %chain, "lock unrelated to any order");
            return Ok(());
        };

        let record = self.store.get(&order_id)?;
        if record.lock(lock_id).is_some() {
            // Locally created; already recorded at call time.
            return Ok(());
        }
        let order = &record.order;

        let role = if chain == &order.source_chain {
            LockRole::Source
        } else if chain == &order.dest_chain {
            LockRole::Dest
        } else {
            return Ok(());
        };

        // Protocol checks before the order advances on an observed lock.
        let violation = match role {
            LockRole::Source => {
                if hashlock != order.hashlock {
                    Some(ReasonCode::HashMismatch)
                } else if amount != order.source_amount {
                    Some(ReasonCode::AmountMismatch)
                } else if timelock_ms != order.timelock_source_ms {
                    Some(ReasonCode::TimelockMargin)
                } else {
                    None
                }
            }
            LockRole::Dest => {
                let fill = record
                    .fills
                    .iter()
                    .find(|f| f.hashlock == hashlock && f.lock_id.is_none());
                match fill {
                    None => Some(ReasonCode::HashMismatch),
                    Some(f)
                        if prorated_dest_value(order, f.amount)
                            .map_or(true, |v| amount.value != v) =>
                    {
                        Some(ReasonCode::AmountMismatch)
                    }
                    Some(_) if timelock_ms != order.timelock_dest_ms => {
                        Some(ReasonCode::TimelockMargin)
                    }
                    Some(_) => None,
                }
            }
        };
        if let Some(reason) = violation {
            let committed = self.store.update(&order_id, &mut |r| {
                apply(r, OrderEvent::ProtocolCheckFailed, Some(reason));
            })?;
            tracing::warn!(order_id = %order_id, lock_id = %lock_id, reason = %reason, "observed lock failed protocol checks");
            self.notify(&committed);
            return Ok(());
        }

        let committed = self.store.update(&order_id, &mut |r| {
            r.locks.push(Lock {
                id: lock_id.clone(),
                chain: chain.clone(),
                role,
                amount: amount.clone(),
                hashlock,
                timelock_ms,
                state: LockState::Created,
                secret: None,
                origin: LockOrigin::External,
            });
            if role == LockRole::Dest {
                if let Some(f) = r
                    .fills
                    .iter_mut()
                    .find(|f| f.hashlock == hashlock && f.lock_id.is_none())
                {
                    f.lock_id = Some(lock_id.clone());
                }
            }
            let event = match role {
                LockRole::Source => OrderEvent::SourceLockConfirmed,
                LockRole::Dest => OrderEvent::DestLockCreated,
            };
            apply(r, event, None);
        })?;

        self.scheduler
            .track_lock(timelock_ms, lock_id.clone(), order_id);
        if role == LockRole::Source {
            self.scheduler
                .untrack_acceptance(self.acceptance_deadline(&committed.order), &order_id);
        }
        self.notify(&committed);
        Ok(())
    }

    async fn on_lock_claimed(
        &self,
        lock_id: &LockId,
        secret: Preimage,
    ) -> Result<(), CoordinatorError> {
        let Some(order_id) = self.store.find_by_lock(lock_id) else {
            return Ok(());
        };

        let mut claimed: Option<(LockRole, Hashlock, u64)> = None;
        self.store.update(&order_id, &mut |r| {
            let Some(lock) = r.lock_mut(lock_id) else { return };
            if lock.state == LockState::Claimed {
                return;
            }
            lock.state = LockState::Claimed;
            lock.secret = Some(secret);
            claimed = Some((lock.role, lock.hashlock, lock.timelock_ms));

            if let Some(fill_id) = r
                .fills
                .iter_mut()
                .find(|f| f.lock_id.as_ref() == Some(lock_id))
                .map(|f| {
                    f.claimed = true;
                    f.id
                })
            {
                self.deposits.release(r, &fill_id);
            }
        })?;
        let Some((role, hashlock, timelock_ms)) = claimed else {
            return Ok(());
        };

        self.secrets.observe_revealed(&hashlock, secret);
        self.scheduler.untrack_lock(timelock_ms, lock_id);
        tracing::info!(order_id = %order_id, lock_id = %lock_id, role = %role, "lock claimed on chain");

        // A destination claim may unlock the source leg.
        if role == LockRole::Dest {
            self.settle_source_leg(&order_id).await?;
        }
        self.finalize_if_complete(&order_id)?;
        Ok(())
    }

    fn on_lock_refunded(&self, lock_id: &LockId) -> Result<(), CoordinatorError> {
        let Some(order_id) = self.store.find_by_lock(lock_id) else {
            return Ok(());
        };

        let committed = self.store.update(&order_id, &mut |r| {
            let Some(lock) = r.lock_mut(lock_id) else { return };
            if lock.state.is_terminal() {
                return;
            }
            lock.state = LockState::Refunded;
            let (role, timelock) = (lock.role, lock.timelock_ms);
            self.scheduler.untrack_lock(timelock, lock_id);

            match role {
                LockRole::Dest => {
                    // The resolver abandoned this fill.
                    if let Some(fill_id) = r
                        .fills
                        .iter()
                        .find(|f| f.lock_id.as_ref() == Some(lock_id) && !f.claimed)
                        .map(|f| f.id)
                    {
                        self.deposits.forfeit(r, &fill_id);
                    }
                }
                LockRole::Source => {
                    apply(r, OrderEvent::TimelockElapsed, Some(ReasonCode::TimelockElapsed));
                }
            }
        })?;
        self.notify(&committed);
        Ok(())
    }

    /// Claim the source lock once its secret can be released.
    ///
    /// In shared-hashlock mode any destination claim already made the secret
    /// public. In per-fill mode the master never appears on chain, so it is
    /// released here, and only after every accepted fill has been claimed.
    async fn settle_source_leg(&self, order_id: &OrderId) -> Result<(), CoordinatorError> {
        let record = self.store.get(order_id)?;
        let Some(source) = record.source_lock().cloned() else {
            return Ok(());
        };
        if source.state != LockState::Created {
            return Ok(());
        }

        let secret = self.source_secret(&record, &source);
        let Some(secret) = secret else {
            return Ok(());
        };

        let adapter = self.adapter(&source.chain)?.clone();
        let claim = self
            .with_retry("claim", || {
                let adapter = adapter.clone();
                let lock_id = source.id.clone();
                async move { adapter.claim(&lock_id, &secret).await }
            })
            .await;

        match claim {
            Ok(_) => {}
            // Another actor claimed first; same logical outcome.
            Err(CoordinatorError::Ledger(e)) if e.is_race_loss() => {}
            Err(CoordinatorError::RetriesExhausted { .. }) => {
                self.mark_stuck(order_id, ReasonCode::RetriesExhausted)?;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.store.update(order_id, &mut |r| {
            if let Some(lock) = r.lock_mut(&source.id) {
                lock.state = LockState::Claimed;
                lock.secret = Some(secret);
            }
        })?;
        self.secrets.observe_revealed(&source.hashlock, secret);
        self.scheduler.untrack_lock(source.timelock_ms, &source.id);
        Ok(())
    }

    /// Handle an expired lock: claim first if the secret is known, refund
    /// otherwise. Losing either race to another actor is success.
    ///
    /// The per-order mutex is held only while the in-flight marker is set;
    /// chain calls run with the guard released, as in `lock_source`.
    async fn resolve_expired_lock(
        &self,
        order_id: &OrderId,
        lock_id: &LockId,
    ) -> Result<(), CoordinatorError> {
        let (record, lock) = {
            let guard = self.guard(order_id);
            let _permit = guard.lock().await;

            let record = self.store.get(order_id)?;
            let Some(lock) = record.lock(lock_id).cloned() else {
                return Ok(());
            };
            if lock.state.is_terminal() {
                return Ok(());
            }
            if record.action_in_flight {
                return Err(CoordinatorError::ActionInFlight(*order_id));
            }
            self.store.update(order_id, &mut |r| r.action_in_flight = true)?;
            (record, lock)
        };

        let outcome = self.settle_expired_lock(order_id, &record, &lock).await;
        self.store.update(order_id, &mut |r| r.action_in_flight = false)?;
        outcome
    }

    async fn settle_expired_lock(
        &self,
        order_id: &OrderId,
        record: &OrderRecord,
        lock: &Lock,
    ) -> Result<(), CoordinatorError> {
        let lock_id = &lock.id;
        let adapter = self.adapter(&lock.chain)?.clone();

        // Claim-before-refund tie-break. A source leg is claimed only with
        // a secret already public on chain; the locally-held master never
        // pays out the source amount while no destination leg was claimed.
        let secret = match lock.role {
            LockRole::Source => self.secrets.revealed(&lock.hashlock.digest),
            LockRole::Dest => self.known_secret(record, lock),
        };
        if let Some(secret) = secret {
            let claim = self
                .with_retry("claim", || {
                    let adapter = adapter.clone();
                    let lock_id = lock.id.clone();
                    async move { adapter.claim(&lock_id, &secret).await }
                })
                .await;
            match claim {
                Ok(_) => {
                    return self.record_claim(order_id, lock, secret).await;
                }
                Err(CoordinatorError::Ledger(e)) if matches!(e, lockstep_ledger::LedgerError::AlreadyClaimed(_)) => {
                    return self.record_claim(order_id, lock, secret).await;
                }
                Err(CoordinatorError::Ledger(e))
                    if matches!(e, lockstep_ledger::LedgerError::LockExpired(_)) =>
                {
                    // Too late to claim; fall through to the refund path.
                }
                Err(CoordinatorError::RetriesExhausted { .. }) => {
                    return self.mark_stuck(order_id, ReasonCode::RetriesExhausted);
                }
                Err(e) => return Err(e),
            }
        }

        // Refunds are only issued for locks this coordinator created.
        if lock.origin != LockOrigin::Local {
            let committed = self.store.update(order_id, &mut |r| {
                if let Some(l) = r.lock_mut(lock_id) {
                    if !l.state.is_terminal() {
                        l.state = LockState::Expired;
                    }
                }
            })?;
            self.notify(&committed);
            return Ok(());
        }

        let refund = self
            .with_retry("refund", || {
                let adapter = adapter.clone();
                let lock_id = lock.id.clone();
                async move { adapter.refund(&lock_id).await }
            })
            .await;

        match refund {
            Ok(_) => {}
            Err(CoordinatorError::Ledger(e)) if e.is_race_loss() => {
                if matches!(e, lockstep_ledger::LedgerError::AlreadyClaimed(_)) {
                    // Lost the race to a claim; pick the secret up from chain.
                    let snap = adapter.get_lock(&lock.id).await?;
                    if let Some(secret) = snap.secret {
                        return self.record_claim(order_id, lock, secret).await;
                    }
                }
            }
            Err(CoordinatorError::RetriesExhausted { .. }) => {
                return self.mark_stuck(order_id, ReasonCode::RetriesExhausted);
            }
            Err(e) => return Err(e),
        }

        let committed = self.store.update(order_id, &mut |r| {
            if let Some(l) = r.lock_mut(lock_id) {
                l.state = LockState::Refunded;
            }
            match lock.role {
                LockRole::Dest => {
                    if let Some(fill_id) = r
                        .fills
                        .iter()
                        .find(|f| f.lock_id.as_ref() == Some(lock_id) && !f.claimed)
                        .map(|f| f.id)
                    {
                        self.deposits.forfeit(r, &fill_id);
                    }
                }
                LockRole::Source => {
                    apply(r, OrderEvent::TimelockElapsed, Some(ReasonCode::TimelockElapsed));
                }
            }
        })?;
        tracing::info!(order_id = %order_id, lock_id = %lock_id, role = %lock.role, "expired lock refunded");
        self.notify(&committed);
        Ok(())
    }

    /// Cancel an order no filler accepted within the window.
    fn cancel_unaccepted(&self, order_id: &OrderId) -> Result<(), CoordinatorError> {
        let record = self.store.get(order_id)?;
        if record.order.status != OrderStatus::Pending
            || !record.fills.is_empty()
            || !record.locks.is_empty()
        {
            return Ok(());
        }
        let committed = self.store.update(order_id, &mut |r| {
            apply(r, OrderEvent::AcceptanceWindowElapsed, Some(ReasonCode::NoFiller));
        })?;
        tracing::info!(order_id = %order_id, "order cancelled, acceptance window elapsed");
        self.notify(&committed);
        Ok(())
    }

    async fn record_claim(
        &self,
        order_id: &OrderId,
        lock: &Lock,
        secret: Preimage,
    ) -> Result<(), CoordinatorError> {
        self.store.update(order_id, &mut |r| {
            if let Some(l) = r.lock_mut(&lock.id) {
                l.state = LockState::Claimed;
                l.secret = Some(secret);
            }
            if let Some(fill_id) = r
                .fills
                .iter_mut()
                .find(|f| f.lock_id.as_ref() == Some(&lock.id))
                .map(|f| {
                    f.claimed = true;
                    f.id
                })
            {
                self.deposits.release(r, &fill_id);
            }
        })?;
        self.secrets.observe_revealed(&lock.hashlock, secret);
        if lock.role == LockRole::Dest {
            self.settle_source_leg(order_id).await?;
        }
        self.finalize_if_complete(order_id)
    }

    fn finalize_if_complete(&self, order_id: &OrderId) -> Result<(), CoordinatorError> {
        let record = self.store.get(order_id)?;
        if record.order.status.is_final() || !record.all_legs_claimed() {
            return Ok(());
        }
        let committed = self.store.update(order_id, &mut |r| {
            apply(r, OrderEvent::AllLegsClaimed, None);
        })?;
        tracing::info!(order_id = %order_id, "swap completed, all legs claimed");
        self.notify(&committed);
        Ok(())
    }

    fn mark_stuck(&self, order_id: &OrderId, reason: ReasonCode) -> Result<(), CoordinatorError> {
        let committed = self.store.update(order_id, &mut |r| {
            r.action_in_flight = false;
            apply(r, OrderEvent::RetriesExhausted, Some(reason));
        })?;
        tracing::error!(order_id = %order_id, reason = %reason, "order stuck, operator attention required");
        self.notify(&committed);
        Ok(())
    }

    /// Hashlock for fill number `fill_index`, per the configured mode.
    fn fill_hashlock(&self, order: &Order, fill_index: u32) -> Result<Hashlock, CoordinatorError> {
        match self.config.fill_secret_mode {
            FillSecretMode::SharedHashlock => self
                .secrets
                .hashlock_for(&order.id, &order.dest_chain)
                .ok_or(CoordinatorError::UnknownOrder(order.id)),
            FillSecretMode::PerFillDerived => {
                let secret = self
                    .secrets
                    .derive_fill_secret(&order.id, fill_index)
                    .ok_or(CoordinatorError::UnknownOrder(order.id))?;
                self.secrets.hashlock_on(&order.dest_chain, &secret)
            }
        }
    }

    /// Secret usable to claim the source leg, if releasable yet.
    fn source_secret(&self, record: &OrderRecord, source: &Lock) -> Option<Preimage> {
        if let Some(secret) = self.secrets.revealed(&source.hashlock.digest) {
            return Some(secret);
        }
        let master = self.secrets.master(&record.order.id)?;
        match self.config.fill_secret_mode {
            FillSecretMode::SharedHashlock => Some(master),
            FillSecretMode::PerFillDerived => {
                let all_claimed =
                    !record.fills.is_empty() && record.fills.iter().all(|f| f.claimed);
                all_claimed.then_some(master)
            }
        }
    }

    /// Any secret that opens a destination `lock`, from the revealed cache
    /// or local derivation.
    fn known_secret(&self, record: &OrderRecord, lock: &Lock) -> Option<Preimage> {
        if let Some(secret) = self.secrets.revealed(&lock.hashlock.digest) {
            return Some(secret);
        }
        let master = self.secrets.master(&record.order.id)?;
        if lock.hashlock.matches(master.as_bytes()) {
            return Some(master);
        }
        for index in 0..record.fills.len() as u32 {
            let derived = self.secrets.derive_fill_secret(&record.order.id, index)?;
            if lock.hashlock.matches(derived.as_bytes()) {
                return Some(derived);
            }
        }
        None
    }

    /// Run a chain call with bounded exponential backoff on transient errors.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, CoordinatorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, lockstep_ledger::LedgerError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self
                        .config
                        .retry_delay_ms
                        .saturating_mul(1u64 << attempt.min(16));
                    tracing::warn!(operation, attempt, delay_ms = delay, error = %e, "transient chain error, backing off");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(CoordinatorError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt + 1,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn adapter(&self, chain: &ChainId) -> Result<&Arc<dyn LedgerAdapter>, CoordinatorError> {
        self.adapters
            .get(chain)
            .ok_or_else(|| CoordinatorError::UnknownChain(chain.clone()))
    }

    fn guard(&self, order_id: &OrderId) -> Arc<Mutex<()>> {
        self.guards
            .entry(*order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn acceptance_deadline(&self, order: &Order) -> u64 {
        order.created_at.timestamp_millis() as u64 + self.config.acceptance_window_ms
    }

    fn notify(&self, record: &OrderRecord) {
        let _ = self.notify_tx.send(OrderNotification {
            order_id: record.order.id,
            status: record.order.status,
            reason: record.order.reason,
        });
    }

    fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }
}

/// Apply a state-machine event to the record if valid from its current
/// status. Invalid transitions are left alone; out-of-order observations are
/// expected under at-least-once delivery.
fn apply(record: &mut OrderRecord, event: OrderEvent, reason: Option<ReasonCode>) -> bool {
    match OrderStateMachine::transition(record.order.status, event) {
        Ok(next) => {
            record.order.status = next;
            if reason.is_some() {
                record.order.reason = reason;
            }
            true
        }
        Err(_) => false,
    }
}

fn prorated_dest_value(order: &Order, fill_amount: u128) -> Option<u128> {
    order
        .dest_amount
        .value
        .checked_mul(fill_amount)
        .map(|v| v / order.source_amount.value)
}
