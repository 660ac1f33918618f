use crate::state_machine::OrderStatus;

/// Core protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid order state transition from {from} on {event}")]
    InvalidStateTransition { from: OrderStatus, event: String },

    #[error(
        "timelock ordering violated: dest {timelock_dest_ms} must precede source \
         {timelock_source_ms} by at least {margin_ms} ms"
    )]
    TimelockOrdering {
        timelock_source_ms: u64,
        timelock_dest_ms: u64,
        margin_ms: u64,
    },

    #[error("timelock {timelock_ms} outside allowed horizon [{min_ms}, {max_ms}] from now")]
    TimelockHorizon {
        timelock_ms: u64,
        min_ms: u64,
        max_ms: u64,
    },

    #[error("order validation failed: {0}")]
    ValidationError(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}
