use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use lockstep_core::ChainSettings;

use crate::adapter::LedgerAdapter;
use crate::events::LockEvent;

/// Observes one chain through its adapter and forwards normalized lock
/// events into the coordinator's event stream.
///
/// An event is emitted only once it is buried under the chain's
/// confirmation depth; under reorg risk emission is delayed, never
/// retracted. Delivery downstream is at-least-once.
pub struct ChainMonitor {
    adapter: Arc<dyn LedgerAdapter>,
    settings: ChainSettings,
    event_tx: mpsc::Sender<LockEvent>,
}

impl ChainMonitor {
    pub fn new(
        adapter: Arc<dyn LedgerAdapter>,
        settings: ChainSettings,
        event_tx: mpsc::Sender<LockEvent>,
    ) -> Self {
        Self {
            adapter,
            settings,
            event_tx,
        }
    }

    /// Polling loop; runs until the shutdown signal flips.
    ///
    /// Blocks only on this chain's I/O and the outgoing channel, never on
    /// the coordinator or on another monitor.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let chain = self.settings.chain_id.clone();
        let mut ticker = interval(Duration::from_millis(self.settings.poll_interval_ms));
        // Height up to which events have been emitted.
        let mut cursor: u64 = 0;

        info!(chain = %chain, depth = self.settings.confirmation_depth, "chain monitor started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.poll_once(cursor).await {
                        Ok(new_cursor) => cursor = new_cursor,
                        Err(e) => {
                            // Transient chain trouble; keep the cursor and retry
                            // next tick.
                            warn!(chain = %chain, error = %e, "monitor poll failed");
                        }
                    }
                }
            }
        }

        info!(chain = %chain, "chain monitor stopped");
    }

    /// Fetch and emit all events confirmed since `cursor`; returns the new
    /// cursor.
    async fn poll_once(&self, cursor: u64) -> Result<u64, crate::error::LedgerError> {
        let head = self.adapter.head_height().await?;
        let mut events = self.adapter.events_since(cursor).await?;
        events.sort_by_key(|e| e.height);

        let mut cursor = cursor;
        for sequenced in events {
            // Not buried deep enough yet: stop here, emit on a later tick.
            if sequenced.height + self.settings.confirmation_depth > head {
                break;
            }
            debug!(
                chain = %self.settings.chain_id,
                lock_id = %sequenced.event.lock_id,
                kind = sequenced.event.kind.key(),
                height = sequenced.height,
                "emitting confirmed lock event"
            );
            if self.event_tx.send(sequenced.event).await.is_err() {
                // Coordinator gone; nothing left to do.
                return Ok(cursor);
            }
            cursor = cursor.max(sequenced.height);
        }

        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::NewLockParams;
    use crate::adapters::inmem::InMemoryLedger;
    use crate::events::LockEventKind;
    use lockstep_core::{AccountId, Amount, Asset, HashAlgorithm, Hashlock};

    fn settings(depth: u64) -> ChainSettings {
        let mut s = ChainSettings::new("alpha", HashAlgorithm::Sha256);
        s.confirmation_depth = depth;
        s.poll_interval_ms = 10;
        s
    }

    async fn create_lock(ledger: &InMemoryLedger) {
        let sender = AccountId::from("alice");
        ledger.credit(&sender, &Amount::new(1_000, Asset::from("TOK")));
        ledger
            .create_lock(NewLockParams {
                sender,
                receiver: AccountId::from("bob"),
                amount: Amount::new(100, Asset::from("TOK")),
                hashlock: Hashlock::commit(HashAlgorithm::Sha256, b"s"),
                timelock_ms: u64::MAX,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_event_withheld_until_confirmed() {
        let ledger = Arc::new(InMemoryLedger::new("alpha", HashAlgorithm::Sha256));
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = ChainMonitor::new(ledger.clone(), settings(2), tx);

        create_lock(&ledger).await;

        // Created at height 1, head is 1: depth 2 not reached.
        let cursor = monitor.poll_once(0).await.unwrap();
        assert_eq!(cursor, 0);
        assert!(rx.try_recv().is_err());

        // Two more blocks bury it.
        ledger.mine(2);
        let cursor = monitor.poll_once(cursor).await.unwrap();
        assert_eq!(cursor, 1);
        let event = rx.try_recv().unwrap();
        assert!(matches!(event.kind, LockEventKind::Created { .. }));
    }

    #[tokio::test]
    async fn test_cursor_skips_emitted_events() {
        let ledger = Arc::new(InMemoryLedger::new("alpha", HashAlgorithm::Sha256));
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = ChainMonitor::new(ledger.clone(), settings(0), tx);

        create_lock(&ledger).await;
        let cursor = monitor.poll_once(0).await.unwrap();
        assert!(rx.try_recv().is_ok());

        // Nothing new: no events, cursor unchanged.
        let cursor_again = monitor.poll_once(cursor).await.unwrap();
        assert_eq!(cursor, cursor_again);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let ledger = Arc::new(InMemoryLedger::new("alpha", HashAlgorithm::Sha256));
        let (tx, _rx) = mpsc::channel(16);
        let monitor = ChainMonitor::new(ledger, settings(1), tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(monitor.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_sender_dropped() {
        let ledger = Arc::new(InMemoryLedger::new("alpha", HashAlgorithm::Sha256));
        let (tx, _rx) = mpsc::channel(16);
        let monitor = ChainMonitor::new(ledger, settings(1), tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(monitor.run(shutdown_rx));
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop after the shutdown sender dropped")
            .unwrap();
    }
}
