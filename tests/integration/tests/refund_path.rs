//! Timeout handling: refunds, deposit forfeiture, and acceptance-window
//! cancellation.

use std::time::Duration;

use lockstep_core::{Asset, DepositResolution, OrderParams, OrderStatus, ReasonCode};
use lockstep_coordinator::FillRequest;
use lockstep_integration_tests::{fast_config, fund, now_ms, standard_order, Swapnet};

/// Order with sub-second timelocks, valid under the harness limits.
fn short_lived_order() -> OrderParams {
    let now = now_ms();
    let mut params = standard_order(Some(100));
    params.timelock_dest_ms = now + 400;
    params.timelock_source_ms = now + 800;
    params
}

#[tokio::test]
async fn test_timeout_refunds_both_legs_and_forfeits_deposit() {
    let net = Swapnet::start(fast_config()).await;
    fund(&net);

    let snap = net.coordinator.submit_order(short_lived_order()).unwrap();
    let order_id = snap.order.id;
    net.coordinator
        .lock_source(&order_id, &"resolver-1".into())
        .await
        .unwrap();
    net.coordinator
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

    // Nobody claims; both timelocks elapse.
    let done = net
        .wait_for_status(&order_id, OrderStatus::Refunded, Duration::from_secs(5))
        .await;
    assert_eq!(done.order.reason, Some(ReasonCode::TimelockElapsed));

    // Initiator and resolver both whole again.
    assert_eq!(net.alpha.balance(&"alice".into(), &Asset::from("A")), 10_000);
    assert_eq!(
        net.beta.balance(&"resolver-1".into(), &Asset::from("B")),
        10_000
    );

    // The abandoned fill's deposit went to the beneficiary.
    assert_eq!(done.deposits.len(), 1);
    assert_eq!(
        done.deposits[0].resolution,
        Some(DepositResolution::Forfeited {
            to: "alice-beta".into()
        })
    );

    net.stop().await;
}

#[tokio::test]
async fn test_unfilled_order_cancelled_after_acceptance_window() {
    let mut config = fast_config();
    config.acceptance_window_ms = 100;
    let net = Swapnet::start(config).await;

    let snap = net
        .coordinator
        .submit_order(standard_order(Some(100)))
        .unwrap();
    let done = net
        .wait_for_status(&snap.order.id, OrderStatus::Cancelled, Duration::from_secs(3))
        .await;
    assert_eq!(done.order.reason, Some(ReasonCode::NoFiller));
    assert!(done.locks.is_empty());

    net.stop().await;
}

#[tokio::test]
async fn test_funds_conserved_after_refund() {
    let net = Swapnet::start(fast_config()).await;
    fund(&net);
    let total_alpha_before = net.alpha.balance(&"alice".into(), &Asset::from("A"));

    let snap = net.coordinator.submit_order(short_lived_order()).unwrap();
    let order_id = snap.order.id;
    net.coordinator
        .lock_source(&order_id, &"resolver-1".into())
        .await
        .unwrap();

    net.wait_for_status(&order_id, OrderStatus::Refunded, Duration::from_secs(5))
        .await;

    // Every source-asset unit is back where it started.
    assert_eq!(
        net.alpha.balance(&"alice".into(), &Asset::from("A")),
        total_alpha_before
    );
    assert_eq!(
        net.alpha.balance(&"resolver-1".into(), &Asset::from("A")),
        0
    );

    net.stop().await;
}
