//! Oversubscription under concurrency and at-least-once event delivery.

use std::time::Duration;

use lockstep_core::{Asset, DepositResolution, LockRole, OrderStatus};
use lockstep_coordinator::{CoordinatorError, FillError, FillRequest};
use lockstep_integration_tests::{fast_config, fund, standard_order, Swapnet};
use lockstep_ledger::{LockEvent, LockEventKind};

#[tokio::test]
async fn test_concurrent_oversubscription_first_accepted_wins() {
    let net = Swapnet::start(fast_config()).await;
    fund(&net);

    let snap = net
        .coordinator
        .submit_order(standard_order(Some(100)))
        .unwrap();
    let order_id = snap.order.id;
    net.coordinator
        .lock_source(&order_id, &"resolver-1".into())
        .await
        .unwrap();

    // Two resolvers race for 600 of 1000 each.
    let c1 = net.coordinator.clone();
    let c2 = net.coordinator.clone();
    let (a, b) = tokio::join!(
        c1.submit_fill(
            &order_id,
            FillRequest {
                filler: "resolver-1".into(),
                amount: 600,
                deposit: 25,
            },
        ),
        c2.submit_fill(
            &order_id,
            FillRequest {
                filler: "resolver-2".into(),
                amount: 600,
                deposit: 25,
            },
        ),
    );

    let (wins, losses): (Vec<_>, Vec<_>) = [a, b].into_iter().partition(|r| r.is_ok());
    assert_eq!(wins.len(), 1);
    assert!(matches!(
        &losses[0],
        Err(CoordinatorError::Fill(FillError::InsufficientRemaining {
            requested: 600,
            remaining: 400
        }))
    ));

    // Conservation: accepted fills never exceed the source amount, and the
    // loser can still take what remains.
    let after = net.coordinator.get_order(&order_id).unwrap();
    let total: u128 = after.fills.iter().map(|f| f.amount).sum();
    assert_eq!(total, 600);

    net.coordinator
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
    let after = net.coordinator.get_order(&order_id).unwrap();
    let total: u128 = after.fills.iter().map(|f| f.amount).sum();
    assert_eq!(total, after.order.source_amount.value);

    net.stop().await;
}

#[tokio::test]
async fn test_duplicate_and_stale_events_leave_settled_order_alone() {
    let net = Swapnet::start(fast_config()).await;
    fund(&net);

    let snap = net.coordinator.submit_order(standard_order(None)).unwrap();
    let order_id = snap.order.id;
    net.coordinator
        .lock_source(&order_id, &"resolver-1".into())
        .await
        .unwrap();
    let fill = net
        .coordinator
        .submit_fill(
            &order_id,
            FillRequest {
                filler: "resolver-1".into(),
                amount: 1_000,
                deposit: 25,
            },
        )
        .await
        .unwrap();
    net.coordinator
        .claim_destination(&order_id, &fill.id)
        .await
        .unwrap();

    let done = net
        .wait_for_status(&order_id, OrderStatus::Completed, Duration::from_secs(3))
        .await;
    let dest_lock = done
        .locks
        .iter()
        .find(|l| l.role == LockRole::Dest)
        .unwrap()
        .clone();
    let secret = dest_lock.secret.unwrap();

    // Replay the claim twice and follow with a contradictory refund event.
    for _ in 0..2 {
        net.event_tx
            .send(LockEvent {
                chain: "beta".into(),
                lock_id: dest_lock.id.clone(),
                kind: LockEventKind::Claimed { secret },
            })
            .await
            .unwrap();
    }
    net.event_tx
        .send(LockEvent {
            chain: "beta".into(),
            lock_id: dest_lock.id.clone(),
            kind: LockEventKind::Refunded,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let after = net.coordinator.get_order(&order_id).unwrap();
    assert_eq!(after.order.status, OrderStatus::Completed);
    assert_eq!(after.deposits.len(), 1);
    assert_eq!(
        after.deposits[0].resolution,
        Some(DepositResolution::ReleasedToPoster)
    );
    // Balances unchanged by the replays.
    assert_eq!(
        net.alpha.balance(&"resolver-1".into(), &Asset::from("A")),
        1_000
    );
    assert_eq!(
        net.beta.balance(&"alice-beta".into(), &Asset::from("B")),
        1_000
    );

    net.stop().await;
}
