use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::OrderLimits;
use crate::error::CoreError;
use crate::state_machine::{OrderStatus, ReasonCode};
use crate::types::{
    AccountId, Amount, ChainId, DepositId, FillId, Hashlock, LockId, OrderId, Preimage,
};

/// Which leg of the swap a lock secures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockRole {
    Source,
    Dest,
}

impl fmt::Display for LockRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Dest => write!(f, "dest"),
        }
    }
}

/// On-chain lifecycle of an HTLC lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Created,
    Claimed,
    Refunded,
    Expired,
}

impl LockState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Claimed | Self::Refunded)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Claimed => write!(f, "Claimed"),
            Self::Refunded => write!(f, "Refunded"),
            Self::Expired => write!(f, "Expired"),
        }
    }
}

/// Who broadcast the create for a lock. Refunds are only issued for locks
/// this coordinator created itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockOrigin {
    Local,
    External,
}

/// One HTLC lock instance owned by an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub id: LockId,
    pub chain: ChainId,
    pub role: LockRole,
    pub amount: Amount,
    pub hashlock: Hashlock,
    /// Absolute expiry in milliseconds since UNIX epoch.
    pub timelock_ms: u64,
    pub state: LockState,
    /// The revealed preimage, once the lock has been claimed.
    pub secret: Option<Preimage>,
    pub origin: LockOrigin,
}

/// An independently-claimable sub-portion of an order's amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialFill {
    pub id: FillId,
    pub order_id: OrderId,
    pub filler: AccountId,
    /// Fill size in source-amount units.
    pub amount: u128,
    /// Hashlock this fill's destination lock commits to. Equal to the order
    /// hashlock in shared mode, derived per fill otherwise.
    pub hashlock: Hashlock,
    /// Destination lock backing this fill, once created.
    pub lock_id: Option<LockId>,
    pub claimed: bool,
    pub created_at: DateTime<Utc>,
}

/// How a safety deposit was resolved. Each deposit resolves exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositResolution {
    /// Returned to the resolver that posted it (fill completed).
    ReleasedToPoster,
    /// Forfeited because the resolver's lock expired unclaimed.
    Forfeited { to: AccountId },
}

/// Resolver collateral posted alongside a destination lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyDeposit {
    pub id: DepositId,
    pub order_id: OrderId,
    /// The fill this deposit collateralizes.
    pub fill_id: FillId,
    pub poster: AccountId,
    pub amount: u128,
    pub resolution: Option<DepositResolution>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied parameters for a new swap order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderParams {
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    pub source_amount: Amount,
    pub dest_amount: Amount,
    pub initiator: AccountId,
    pub beneficiary: AccountId,
    /// Absolute expiry of the source lock, milliseconds since epoch.
    pub timelock_source_ms: u64,
    /// Absolute expiry of destination locks, milliseconds since epoch.
    pub timelock_dest_ms: u64,
    /// Minimum accepted fill size; `None` disables partial fills.
    pub min_fill_amount: Option<u128>,
}

/// A cross-chain swap order. Created by the initiator, mutated only by the
/// coordinator, retained forever once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    pub source_amount: Amount,
    pub dest_amount: Amount,
    pub initiator: AccountId,
    pub beneficiary: AccountId,
    /// Source-chain hashlock commitment. Per-chain digests of the same
    /// secret are resolved through the secret manager.
    pub hashlock: Hashlock,
    pub timelock_source_ms: u64,
    pub timelock_dest_ms: u64,
    pub status: OrderStatus,
    pub min_fill_amount: Option<u128>,
    /// Resolver fee in source-amount units, computed from the configured
    /// basis-point rate at creation.
    pub resolver_fee: u128,
    /// Why the order is Cancelled / Stuck, if it is.
    pub reason: Option<ReasonCode>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Validate `params` against `limits` and build a Pending order.
    ///
    /// Enforces the cross-chain safety invariant: the destination lock must
    /// expire before the source lock with enough margin that a party who
    /// reveals the secret at the destination can still claim the source leg.
    pub fn create(
        params: OrderParams,
        hashlock: Hashlock,
        limits: &OrderLimits,
        now_ms: u64,
    ) -> Result<Self, CoreError> {
        if params.source_amount.is_zero() || params.dest_amount.is_zero() {
            return Err(CoreError::InvalidAmount("amounts must be positive".into()));
        }
        if params.source_chain == params.dest_chain {
            return Err(CoreError::ValidationError(
                "source and destination chain must differ".into(),
            ));
        }
        if let Some(min_fill) = params.min_fill_amount {
            if min_fill == 0 || min_fill > params.source_amount.value {
                return Err(CoreError::InvalidAmount(format!(
                    "min fill {} outside (0, {}]",
                    min_fill, params.source_amount.value
                )));
            }
        }

        // Both timelocks must sit inside the configured horizon.
        for timelock in [params.timelock_source_ms, params.timelock_dest_ms] {
            let min = now_ms.saturating_add(limits.min_timelock_ms);
            let max = now_ms.saturating_add(limits.max_timelock_ms);
            if timelock < min || timelock > max {
                return Err(CoreError::TimelockHorizon {
                    timelock_ms: timelock,
                    min_ms: limits.min_timelock_ms,
                    max_ms: limits.max_timelock_ms,
                });
            }
        }

        // Invariant: timelock_dest + margin <= timelock_source.
        if params
            .timelock_dest_ms
            .saturating_add(limits.timelock_margin_ms)
            > params.timelock_source_ms
        {
            return Err(CoreError::TimelockOrdering {
                timelock_source_ms: params.timelock_source_ms,
                timelock_dest_ms: params.timelock_dest_ms,
                margin_ms: limits.timelock_margin_ms,
            });
        }

        let resolver_fee = params
            .source_amount
            .value
            .checked_mul(limits.resolver_fee_bps as u128)
            .map(|v| v / 10_000)
            .ok_or_else(|| {
                CoreError::InvalidAmount("source amount too large for fee computation".into())
            })?;

        Ok(Self {
            id: OrderId::new(),
            source_chain: params.source_chain,
            dest_chain: params.dest_chain,
            source_amount: params.source_amount,
            dest_amount: params.dest_amount,
            initiator: params.initiator,
            beneficiary: params.beneficiary,
            hashlock,
            timelock_source_ms: params.timelock_source_ms,
            timelock_dest_ms: params.timelock_dest_ms,
            status: OrderStatus::Pending,
            min_fill_amount: params.min_fill_amount,
            resolver_fee,
            reason: None,
            created_at: Utc::now(),
        })
    }

    /// Whether partial fills are enabled for this order.
    pub fn allows_partial_fills(&self) -> bool {
        self.min_fill_amount.is_some()
    }
}

/// Read-only view of an order and all of its child records, as returned to
/// the operational layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order: Order,
    pub locks: Vec<Lock>,
    pub fills: Vec<PartialFill>,
    pub deposits: Vec<SafetyDeposit>,
    /// Optimistic-concurrency version of the backing record.
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, HashAlgorithm};

    fn limits() -> OrderLimits {
        OrderLimits {
            timelock_margin_ms: 600_000,
            min_timelock_ms: 3_600_000,
            max_timelock_ms: 2_592_000_000,
            resolver_fee_bps: 50,
        }
    }

    fn params(now_ms: u64) -> OrderParams {
        OrderParams {
            source_chain: "alpha".into(),
            dest_chain: "beta".into(),
            source_amount: Amount::new(1_000_000, Asset::from("A")),
            dest_amount: Amount::new(990_000, Asset::from("B")),
            initiator: "alice".into(),
            beneficiary: "alice-on-beta".into(),
            timelock_source_ms: now_ms + 7_200_000,
            timelock_dest_ms: now_ms + 3_600_000,
            min_fill_amount: Some(100_000),
        }
    }

    fn hashlock() -> Hashlock {
        Hashlock::commit(HashAlgorithm::Sha256, b"secret")
    }

    #[test]
    fn test_create_valid_order() {
        let now = 1_000_000_000_000;
        let order = Order::create(params(now), hashlock(), &limits(), now).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.allows_partial_fills());
        // 0.5% of 1_000_000
        assert_eq!(order.resolver_fee, 5_000);
    }

    #[test]
    fn test_rejects_inverted_timelocks() {
        let now = 1_000_000_000_000;
        let mut p = params(now);
        p.timelock_dest_ms = p.timelock_source_ms + 1;
        let err = Order::create(p, hashlock(), &limits(), now).unwrap_err();
        assert!(matches!(err, CoreError::TimelockOrdering { .. }));
    }

    #[test]
    fn test_rejects_insufficient_margin() {
        let now = 1_000_000_000_000;
        let mut p = params(now);
        // Dest expires only 1s before source; margin requires 600s.
        p.timelock_dest_ms = p.timelock_source_ms - 1_000;
        let err = Order::create(p, hashlock(), &limits(), now).unwrap_err();
        assert!(matches!(err, CoreError::TimelockOrdering { .. }));
    }

    #[test]
    fn test_rejects_timelock_below_horizon() {
        let now = 1_000_000_000_000;
        let mut p = params(now);
        p.timelock_dest_ms = now + 1_000;
        let err = Order::create(p, hashlock(), &limits(), now).unwrap_err();
        assert!(matches!(err, CoreError::TimelockHorizon { .. }));
    }

    #[test]
    fn test_rejects_zero_amount() {
        let now = 1_000_000_000_000;
        let mut p = params(now);
        p.source_amount = Amount::new(0, Asset::from("A"));
        assert!(Order::create(p, hashlock(), &limits(), now).is_err());
    }

    #[test]
    fn test_rejects_same_chain() {
        let now = 1_000_000_000_000;
        let mut p = params(now);
        p.dest_chain = p.source_chain.clone();
        assert!(Order::create(p, hashlock(), &limits(), now).is_err());
    }

    #[test]
    fn test_rejects_fee_overflow() {
        let now = 1_000_000_000_000;
        let mut p = params(now);
        p.source_amount = Amount::new(u128::MAX / 2, Asset::from("A"));
        let err = Order::create(p, hashlock(), &limits(), now).unwrap_err();
        assert!(matches!(err, CoreError::InvalidAmount(_)));
    }

    #[test]
    fn test_rejects_min_fill_above_total() {
        let now = 1_000_000_000_000;
        let mut p = params(now);
        p.min_fill_amount = Some(2_000_000);
        assert!(Order::create(p, hashlock(), &limits(), now).is_err());
    }
}
