use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{AccountId, ChainId, HashAlgorithm};

/// How hashlocks are assigned when an order is split across partial fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillSecretMode {
    /// Every fill's lock commits to the order's single hashlock. Simpler,
    /// but the first claim exposes the secret for all remaining fills.
    SharedHashlock,
    /// Each fill gets an independent secret derived from the order's master
    /// secret, so one fill's revealed secret cannot be replayed against
    /// another fill's differently-sized lock.
    PerFillDerived,
}

/// Where forfeited safety deposits go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForfeitDestination {
    /// The abandoned order's beneficiary.
    Beneficiary,
    /// A protocol treasury account.
    Treasury(AccountId),
}

/// Validation limits applied to incoming orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLimits {
    /// Required gap between destination and source timelocks (ms).
    pub timelock_margin_ms: u64,
    /// Minimum timelock distance from now (ms).
    pub min_timelock_ms: u64,
    /// Maximum timelock distance from now (ms).
    pub max_timelock_ms: u64,
    /// Resolver fee rate in basis points of the source amount.
    pub resolver_fee_bps: u32,
}

impl Default for OrderLimits {
    fn default() -> Self {
        Self {
            timelock_margin_ms: 600_000,        // 10 minutes
            min_timelock_ms: 3_600_000,         // 1 hour
            max_timelock_ms: 2_592_000_000,     // 30 days
            resolver_fee_bps: 50,               // 0.5%
        }
    }
}

/// Per-chain settings for adapters and monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: ChainId,
    /// Digest function this chain's lock contract verifies preimages with.
    pub hash_algorithm: HashAlgorithm,
    /// Blocks an event must be buried under before the monitor emits it.
    pub confirmation_depth: u64,
    /// Monitor polling interval (ms).
    pub poll_interval_ms: u64,
}

impl ChainSettings {
    pub fn new(chain_id: impl Into<ChainId>, hash_algorithm: HashAlgorithm) -> Self {
        Self {
            chain_id: chain_id.into(),
            hash_algorithm,
            confirmation_depth: 2,
            poll_interval_ms: 500,
        }
    }
}

/// Configuration for the swap coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Order validation limits.
    pub limits: OrderLimits,
    /// Window after creation in which a filler must accept a Pending order (ms).
    pub acceptance_window_ms: u64,
    /// Scheduler tick interval (ms).
    pub tick_interval_ms: u64,
    /// Chain call retry budget before an order is marked Stuck.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (ms).
    pub retry_delay_ms: u64,
    /// Hashlock assignment for partial fills.
    pub fill_secret_mode: FillSecretMode,
    /// Destination of forfeited safety deposits.
    pub forfeit_destination: ForfeitDestination,
    /// Minimum safety deposit a resolver must post per fill.
    pub min_safety_deposit: u128,
    /// Resolver accounts allowed to fill orders; empty means open access.
    pub authorized_resolvers: Vec<AccountId>,
    /// Chains this coordinator operates on.
    pub chains: Vec<ChainSettings>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            limits: OrderLimits::default(),
            acceptance_window_ms: 1_800_000, // 30 minutes
            tick_interval_ms: 1_000,
            max_retries: 5,
            retry_delay_ms: 500,
            fill_secret_mode: FillSecretMode::PerFillDerived,
            forfeit_destination: ForfeitDestination::Beneficiary,
            min_safety_deposit: 1_000_000,
            authorized_resolvers: Vec::new(),
            chains: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse a config from TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self, CoreError> {
        toml::from_str(raw).map_err(|e| CoreError::ValidationError(format!("bad config: {}", e)))
    }

    /// Settings for a chain, if configured.
    pub fn chain(&self, chain_id: &ChainId) -> Option<&ChainSettings> {
        self.chains.iter().find(|c| &c.chain_id == chain_id)
    }

    /// Whether `resolver` may fill orders. An empty allow-list is open access.
    pub fn resolver_authorized(&self, resolver: &AccountId) -> bool {
        self.authorized_resolvers.is_empty() || self.authorized_resolvers.contains(resolver)
    }
}
