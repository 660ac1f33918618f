use chrono::Utc;

use lockstep_core::{
    AccountId, CoordinatorConfig, FillId, Hashlock, OrderStatus, PartialFill,
};

use crate::store::OrderRecord;

/// A resolver's request to fill (part of) an order.
#[derive(Debug, Clone)]
pub struct FillRequest {
    pub filler: AccountId,
    /// Fill size in source-amount units.
    pub amount: u128,
    /// Safety deposit the resolver posts for this fill.
    pub deposit: u128,
}

/// Why a fill request was rejected.
#[derive(Debug, thiserror::Error)]
pub enum FillError {
    #[error("order not fillable in status {0}")]
    OrderNotFillable(OrderStatus),

    #[error("order only accepts a single whole-amount fill")]
    PartialFillsDisabled,

    #[error("fill {requested} below minimum {minimum}")]
    BelowMinimumFill { requested: u128, minimum: u128 },

    #[error("fill {requested} exceeds remaining {remaining}")]
    InsufficientRemaining { requested: u128, remaining: u128 },

    #[error("safety deposit {posted} below minimum {minimum}")]
    DepositTooLow { posted: u128, minimum: u128 },

    #[error("resolver {0} not authorized")]
    UnauthorizedResolver(AccountId),
}

/// Splits a fillable order's amount among concurrent fillers.
///
/// Allocation mutates the record's single `remaining` counter, and callers
/// run it inside the store's per-order update, so acceptance and the
/// decrement are atomic: on oversubscription the first accepted fill wins
/// and later ones are rejected with `InsufficientRemaining`.
pub struct PartialFillAllocator;

impl PartialFillAllocator {
    /// Validate `request` against `record` and, if accepted, append the fill
    /// and decrement the remaining amount. The fill's destination hashlock
    /// is assigned by the caller beforehand.
    pub fn allocate(
        record: &mut OrderRecord,
        request: &FillRequest,
        hashlock: Hashlock,
        config: &CoordinatorConfig,
    ) -> Result<PartialFill, FillError> {
        if !config.resolver_authorized(&request.filler) {
            return Err(FillError::UnauthorizedResolver(request.filler.clone()));
        }
        // A fill needs the confirmed source leg first: the DestLockCreated
        // status advance has nowhere to go from Pending, and a destination
        // lock against an unconfirmed order could settle both legs on chain
        // without the order ever reaching a terminal status.
        if !matches!(
            record.order.status,
            OrderStatus::SourceLocked | OrderStatus::DestLocked
        ) {
            return Err(FillError::OrderNotFillable(record.order.status));
        }

        // Orders without a minimum fill accept exactly one whole-amount fill.
        let minimum = match record.order.min_fill_amount {
            Some(m) => m,
            None if request.amount == record.order.source_amount.value => request.amount,
            None => return Err(FillError::PartialFillsDisabled),
        };
        if request.amount < minimum {
            return Err(FillError::BelowMinimumFill {
                requested: request.amount,
                minimum,
            });
        }
        if request.amount > record.remaining {
            return Err(FillError::InsufficientRemaining {
                requested: request.amount,
                remaining: record.remaining,
            });
        }
        if request.deposit < config.min_safety_deposit {
            return Err(FillError::DepositTooLow {
                posted: request.deposit,
                minimum: config.min_safety_deposit,
            });
        }

        record.remaining -= request.amount;
        let fill = PartialFill {
            id: FillId::new(),
            order_id: record.order.id,
            filler: request.filler.clone(),
            amount: request.amount,
            hashlock,
            lock_id: None,
            claimed: false,
            created_at: Utc::now(),
        };
        record.fills.push(fill.clone());

        tracing::info!(
            order_id = %record.order.id,
            fill_id = %fill.id,
            filler = %fill.filler,
            amount = fill.amount,
            remaining = record.remaining,
            "fill accepted"
        );
        Ok(fill)
    }

    /// Sum of accepted fill amounts. Conservation invariant: never exceeds
    /// the order's source amount.
    pub fn active_fill_total(record: &OrderRecord) -> u128 {
        record.fills.iter().map(|f| f.amount).sum()
    }
}
