//! Shared harness for the end-to-end swap scenarios.
//!
//! Wires two in-memory ledgers, their chain monitors, and a coordinator
//! into one running "swapnet" with fast polling and tick intervals so the
//! scenarios settle in real time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use lockstep_coordinator::{Coordinator, InMemoryOrderStore};
use lockstep_core::{
    Amount, Asset, ChainSettings, CoordinatorConfig, HashAlgorithm, OrderId, OrderLimits,
    OrderParams, OrderSnapshot, OrderStatus,
};
use lockstep_ledger::{ChainMonitor, InMemoryLedger, LockEvent};

/// Two chains with different digest functions, a monitor each, and the
/// coordinator loop, all running.
pub struct Swapnet {
    pub coordinator: Arc<Coordinator>,
    pub alpha: Arc<InMemoryLedger>,
    pub beta: Arc<InMemoryLedger>,
    /// Direct handle into the coordinator's event stream, for injecting
    /// duplicate or stale deliveries.
    pub event_tx: mpsc::Sender<LockEvent>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Millisecond-scale intervals so scenarios complete quickly; events emit
/// without burial (confirmation gating has its own scenario).
pub fn fast_config() -> CoordinatorConfig {
    let mut alpha = ChainSettings::new("alpha", HashAlgorithm::Sha256);
    let mut beta = ChainSettings::new("beta", HashAlgorithm::Keccak256);
    for chain in [&mut alpha, &mut beta] {
        chain.confirmation_depth = 0;
        chain.poll_interval_ms = 10;
    }
    CoordinatorConfig {
        limits: OrderLimits {
            timelock_margin_ms: 50,
            min_timelock_ms: 0,
            max_timelock_ms: 86_400_000,
            resolver_fee_bps: 50,
        },
        acceptance_window_ms: 600_000,
        tick_interval_ms: 20,
        max_retries: 2,
        retry_delay_ms: 1,
        min_safety_deposit: 10,
        chains: vec![alpha, beta],
        ..CoordinatorConfig::default()
    }
}

impl Swapnet {
    pub async fn start(config: CoordinatorConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let alpha = Arc::new(InMemoryLedger::new("alpha", HashAlgorithm::Sha256));
        let beta = Arc::new(InMemoryLedger::new("beta", HashAlgorithm::Keccak256));

        let mut coordinator = Coordinator::new(config.clone(), Arc::new(InMemoryOrderStore::new()));
        coordinator.register_adapter(alpha.clone());
        coordinator.register_adapter(beta.clone());
        let coordinator = Arc::new(coordinator);

        let (event_tx, event_rx) = mpsc::channel(64);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut handles = Vec::new();
        for adapter in [
            alpha.clone() as Arc<dyn lockstep_ledger::LedgerAdapter>,
            beta.clone() as Arc<dyn lockstep_ledger::LedgerAdapter>,
        ] {
            let settings = config
                .chain(adapter.chain_id())
                .expect("chain configured")
                .clone();
            let monitor = ChainMonitor::new(adapter, settings, event_tx.clone());
            handles.push(tokio::spawn(monitor.run(shutdown_rx.clone())));
        }
        handles.push(tokio::spawn(
            coordinator.clone().run(event_rx, shutdown_rx),
        ));

        Self {
            coordinator,
            alpha,
            beta,
            event_tx,
            shutdown,
            handles,
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    /// Poll until the order reaches `status` or `timeout` elapses.
    pub async fn wait_for_status(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        timeout: Duration,
    ) -> OrderSnapshot {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.coordinator.get_order(order_id).expect("order exists");
            if snapshot.order.status == status {
                return snapshot;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "order {} stayed {} instead of reaching {}",
                    order_id, snapshot.order.status, status
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// A 1000 A on alpha for 1000 B on beta order between alice and her beta
/// account, with hour-scale timelocks.
pub fn standard_order(min_fill: Option<u128>) -> OrderParams {
    let now = now_ms();
    OrderParams {
        source_chain: "alpha".into(),
        dest_chain: "beta".into(),
        source_amount: Amount::new(1_000, Asset::from("A")),
        dest_amount: Amount::new(1_000, Asset::from("B")),
        initiator: "alice".into(),
        beneficiary: "alice-beta".into(),
        timelock_source_ms: now + 7_200_000,
        timelock_dest_ms: now + 3_600_000,
        min_fill_amount: min_fill,
    }
}

/// Seed both sides with working balances.
pub fn fund(net: &Swapnet) {
    net.alpha
        .credit(&"alice".into(), &Amount::new(10_000, Asset::from("A")));
    net.beta
        .credit(&"resolver-1".into(), &Amount::new(10_000, Asset::from("B")));
    net.beta
        .credit(&"resolver-2".into(), &Amount::new(10_000, Asset::from("B")));
}
