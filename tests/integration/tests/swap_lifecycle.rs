//! Happy-path settlement across chains with different hash primitives.

use std::time::Duration;

use lockstep_core::{Amount, Asset, DepositResolution, HashAlgorithm, OrderStatus};
use lockstep_coordinator::FillRequest;
use lockstep_integration_tests::{fast_config, fund, standard_order, Swapnet};
use lockstep_ledger::{LedgerAdapter, NewLockParams};

#[tokio::test]
async fn test_happy_path_across_hash_algorithms() {
    let net = Swapnet::start(fast_config()).await;
    fund(&net);

    let snap = net
        .coordinator
        .submit_order(standard_order(Some(100)))
        .unwrap();
    let order_id = snap.order.id;
    // The order commits under the source chain's digest function.
    assert_eq!(snap.order.hashlock.algorithm, HashAlgorithm::Sha256);

    net.coordinator
        .lock_source(&order_id, &"resolver-1".into())
        .await
        .unwrap();

    let first = net
        .coordinator
        .submit_fill(
            &order_id,
            FillRequest {
                filler: "resolver-1".into(),
                amount: 600,
                deposit: 25,
            },
        )
        .await
        .unwrap();
    let second = net
        .coordinator
        .submit_fill(
            &order_id,
            FillRequest {
                filler: "resolver-2".into(),
                amount: 400,
                deposit: 25,
            },
        )
        .await
        .unwrap();

    // Destination locks verify under keccak256, with an independent secret
    // per fill.
    assert_eq!(first.hashlock.algorithm, HashAlgorithm::Keccak256);
    assert_ne!(first.hashlock.digest, second.hashlock.digest);

    net.coordinator
        .claim_destination(&order_id, &first.id)
        .await
        .unwrap();
    net.coordinator
        .claim_destination(&order_id, &second.id)
        .await
        .unwrap();

    let done = net
        .wait_for_status(&order_id, OrderStatus::Completed, Duration::from_secs(3))
        .await;

    // Beneficiary holds the full destination amount; the source amount went
    // to the resolver named in the source lock.
    assert_eq!(
        net.beta.balance(&"alice-beta".into(), &Asset::from("B")),
        1_000
    );
    assert_eq!(
        net.alpha.balance(&"resolver-1".into(), &Asset::from("A")),
        1_000
    );
    assert_eq!(net.alpha.balance(&"alice".into(), &Asset::from("A")), 9_000);

    // Deposits resolved exactly once, back to their posters.
    assert_eq!(done.deposits.len(), 2);
    assert!(done
        .deposits
        .iter()
        .all(|d| d.resolution == Some(DepositResolution::ReleasedToPoster)));

    net.stop().await;
}

#[tokio::test]
async fn test_external_source_lock_confirms_via_monitor() {
    let net = Swapnet::start(fast_config()).await;
    fund(&net);

    let snap = net
        .coordinator
        .submit_order(standard_order(Some(100)))
        .unwrap();
    let order_id = snap.order.id;

    // The initiator locks directly on chain instead of going through the
    // engine; the monitor's Created event drives the transition.
    net.alpha
        .create_lock(NewLockParams {
            sender: "alice".into(),
            receiver: "resolver-1".into(),
            amount: snap.order.source_amount.clone(),
            hashlock: snap.order.hashlock,
            timelock_ms: snap.order.timelock_source_ms,
        })
        .await
        .unwrap();

    let after = net
        .wait_for_status(&order_id, OrderStatus::SourceLocked, Duration::from_secs(3))
        .await;
    assert_eq!(after.locks.len(), 1);

    net.stop().await;
}

#[tokio::test]
async fn test_confirmation_depth_withholds_shallow_events() {
    let mut config = fast_config();
    for chain in &mut config.chains {
        chain.confirmation_depth = 2;
    }
    let net = Swapnet::start(config).await;
    fund(&net);

    let snap = net
        .coordinator
        .submit_order(standard_order(Some(100)))
        .unwrap();
    let order_id = snap.order.id;

    net.alpha
        .create_lock(NewLockParams {
            sender: "alice".into(),
            receiver: "resolver-1".into(),
            amount: snap.order.source_amount.clone(),
            hashlock: snap.order.hashlock,
            timelock_ms: snap.order.timelock_source_ms,
        })
        .await
        .unwrap();

    // The lock sits at the head; the monitor must not emit it yet.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        net.coordinator.get_order(&order_id).unwrap().order.status,
        OrderStatus::Pending
    );

    // Two more blocks bury it past the confirmation depth.
    net.alpha.mine(2);
    net.wait_for_status(&order_id, OrderStatus::SourceLocked, Duration::from_secs(3))
        .await;

    net.stop().await;
}

#[tokio::test]
async fn test_resolver_fee_recorded_on_admission() {
    let net = Swapnet::start(fast_config()).await;
    let snap = net
        .coordinator
        .submit_order(standard_order(None))
        .unwrap();
    // 50 bps of 1000.
    assert_eq!(snap.order.resolver_fee, 5);
    net.stop().await;
}
