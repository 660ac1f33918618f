use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The lifecycle states of a swap order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Order created; no funds locked yet.
    Pending,
    /// The source-chain lock exists and is confirmed.
    SourceLocked,
    /// A matching destination lock exists (all accepted fills covered).
    DestLocked,
    /// Secret revealed and every leg claimed. Final state.
    Completed,
    /// Timelock elapsed before completion; locks returned to their creators. Final state.
    Refunded,
    /// No filler accepted within the window, or a protocol check failed
    /// before any destination funds were locked. Final state.
    Cancelled,
    /// Automated handling exhausted; waiting for an operator. Final for automation.
    Stuck,
}

impl OrderStatus {
    /// Whether this is a final (terminal) state.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Refunded | Self::Cancelled | Self::Stuck
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::SourceLocked => write!(f, "SourceLocked"),
            Self::DestLocked => write!(f, "DestLocked"),
            Self::Completed => write!(f, "Completed"),
            Self::Refunded => write!(f, "Refunded"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Stuck => write!(f, "Stuck"),
        }
    }
}

/// Events that drive order state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    /// The source-chain lock was confirmed (locally created or observed).
    SourceLockConfirmed,
    /// The destination-chain lock(s) were created for the accepted fill(s).
    DestLockCreated,
    /// The secret was revealed and every outstanding leg was claimed.
    AllLegsClaimed,
    /// The owning lock's timelock elapsed unclaimed and refunds were issued.
    TimelockElapsed,
    /// No filler accepted the order before the acceptance deadline.
    AcceptanceWindowElapsed,
    /// A protocol check failed before destination funds were locked.
    ProtocolCheckFailed,
    /// Bounded retries exhausted; hand the order to an operator.
    RetriesExhausted,
}

/// Machine-readable reason attached to `Cancelled` / `Stuck` orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    /// `timelock_dest` does not precede `timelock_source` by the safety margin.
    TimelockMargin,
    /// Hashlock on chain does not match the order's commitment.
    HashMismatch,
    /// On-chain locked amount does not match the order.
    AmountMismatch,
    /// The chain rejected a secret it should have accepted.
    InvalidSecret,
    /// No filler accepted within the acceptance window.
    NoFiller,
    /// Timelock elapsed before completion.
    TimelockElapsed,
    /// Retry budget exhausted on a chain call.
    RetriesExhausted,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimelockMargin => write!(f, "timelock-margin"),
            Self::HashMismatch => write!(f, "hash-mismatch"),
            Self::AmountMismatch => write!(f, "amount-mismatch"),
            Self::InvalidSecret => write!(f, "invalid-secret"),
            Self::NoFiller => write!(f, "no-filler"),
            Self::TimelockElapsed => write!(f, "timelock-elapsed"),
            Self::RetriesExhausted => write!(f, "retries-exhausted"),
        }
    }
}

/// Manages order state transitions.
///
/// Valid transitions:
/// - Pending → SourceLocked (SourceLockConfirmed)
/// - Pending → Cancelled (AcceptanceWindowElapsed | ProtocolCheckFailed)
/// - SourceLocked → DestLocked (DestLockCreated)
/// - SourceLocked → Cancelled (ProtocolCheckFailed)
/// - SourceLocked → Refunded (TimelockElapsed)
/// - DestLocked → Completed (AllLegsClaimed)
/// - DestLocked → Refunded (TimelockElapsed)
/// - {SourceLocked, DestLocked} → Stuck (RetriesExhausted)
/// - DestLocked → Stuck (ProtocolCheckFailed; funds already locked, no safe
///   automatic abort)
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Attempt a state transition based on an event.
    /// Returns the new state on success, or an error for invalid transitions.
    pub fn transition(
        current: OrderStatus,
        event: OrderEvent,
    ) -> Result<OrderStatus, CoreError> {
        let new_state = match (current, event) {
            // From Pending
            (OrderStatus::Pending, OrderEvent::SourceLockConfirmed) => OrderStatus::SourceLocked,
            (OrderStatus::Pending, OrderEvent::AcceptanceWindowElapsed) => OrderStatus::Cancelled,
            (OrderStatus::Pending, OrderEvent::ProtocolCheckFailed) => OrderStatus::Cancelled,

            // From SourceLocked
            (OrderStatus::SourceLocked, OrderEvent::DestLockCreated) => OrderStatus::DestLocked,
            (OrderStatus::SourceLocked, OrderEvent::ProtocolCheckFailed) => OrderStatus::Cancelled,
            (OrderStatus::SourceLocked, OrderEvent::TimelockElapsed) => OrderStatus::Refunded,
            (OrderStatus::SourceLocked, OrderEvent::RetriesExhausted) => OrderStatus::Stuck,

            // From DestLocked
            (OrderStatus::DestLocked, OrderEvent::AllLegsClaimed) => OrderStatus::Completed,
            (OrderStatus::DestLocked, OrderEvent::TimelockElapsed) => OrderStatus::Refunded,
            (OrderStatus::DestLocked, OrderEvent::RetriesExhausted) => OrderStatus::Stuck,
            (OrderStatus::DestLocked, OrderEvent::ProtocolCheckFailed) => OrderStatus::Stuck,

            // All other transitions are invalid
            _ => {
                return Err(CoreError::InvalidStateTransition {
                    from: current,
                    event: format!("{:?}", event),
                });
            }
        };

        tracing::debug!(
            from = %current,
            to = %new_state,
            event = ?event,
            "order state transition"
        );

        Ok(new_state)
    }

    /// Check if a transition is valid without performing it.
    pub fn can_transition(current: OrderStatus, event: OrderEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
