mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::TestLedger;
use stateset_stock_ledger::{
    config::InventorySettings, entities::inventory_reservation::ReservationType, events::Event,
};
use uuid::Uuid;

#[tokio::test]
async fn sweep_releases_expired_holds() {
    let mut ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 100).await;
    ledger
        .engine
        .reserve(p1, 30, "cart-A", ReservationType::Cart, 1800)
        .await
        .unwrap();
    let before = ledger.engine.get_stock(p1).await.unwrap();

    ledger
        .engine
        .reserve(p1, 10, "cart-B", ReservationType::Cart, 1)
        .await
        .unwrap();
    assert_eq!(ledger.engine.get_stock(p1).await.unwrap().available, 60);
    ledger.drain_events();

    let report = ledger
        .engine
        .expiry_sweeper()
        .sweep_at(Utc::now() + Duration::seconds(2))
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.released, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.products_evaluated, 1);

    let after = ledger.engine.get_stock(p1).await.unwrap();
    assert_eq!(after, before);
    let live = ledger.engine.list_live(Some(p1)).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].reserved_for, "cart-A");

    assert!(ledger.drain_events().iter().any(|e| matches!(
        e,
        Event::ReservationReleased {
            quantity: 10,
            expired: true,
            ..
        }
    )));
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn sweep_leaves_unexpired_holds_alone() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 10).await;
    ledger
        .engine
        .reserve(p1, 4, "cart-A", ReservationType::Cart, 600)
        .await
        .unwrap();

    let report = ledger.engine.expiry_sweeper().sweep().await.unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(ledger.engine.get_stock(p1).await.unwrap().reserved, 4);
}

#[tokio::test]
async fn sweep_after_manual_release_finds_nothing() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 10).await;
    ledger
        .engine
        .reserve(p1, 4, "cart-A", ReservationType::Cart, 1)
        .await
        .unwrap();
    ledger.engine.release(p1, "cart-A", None).await.unwrap();

    let report = ledger
        .engine
        .expiry_sweeper()
        .sweep_at(Utc::now() + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(report.released, 0);
    assert_eq!(ledger.engine.get_stock(p1).await.unwrap().available, 10);
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn sweep_releases_each_hold_of_an_owner_exactly_once() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    let p2 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 10).await;
    ledger.seed(p2, "SKU2", 10).await;

    for (product, quantity) in [(p1, 2), (p1, 2), (p1, 3), (p2, 5)] {
        ledger
            .engine
            .reserve(product, quantity, "cart-X", ReservationType::Cart, 1)
            .await
            .unwrap();
    }

    let report = ledger
        .engine
        .expiry_sweeper()
        .sweep_at(Utc::now() + Duration::seconds(2))
        .await
        .unwrap();
    assert_eq!(report.examined, 4);
    assert_eq!(report.released, 4);
    assert_eq!(report.products_evaluated, 2);

    for product in [p1, p2] {
        let stock = ledger.engine.get_stock(product).await.unwrap();
        assert_eq!((stock.available, stock.reserved), (10, 0));
        ledger.assert_consistent(product).await;
    }
}

#[tokio::test]
async fn started_sweeper_releases_in_background_and_stops() {
    let settings = InventorySettings {
        sweep_interval_secs: 1,
        ..Default::default()
    };
    let ledger = TestLedger::with_settings(settings).await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 10).await;
    ledger
        .engine
        .reserve(p1, 6, "cart-A", ReservationType::Cart, 1)
        .await
        .unwrap();

    let handle = ledger.engine.expiry_sweeper().start();
    assert!(!handle.is_finished());

    let released = tokio::time::timeout(StdDuration::from_secs(10), async {
        loop {
            if ledger.engine.get_stock(p1).await.unwrap().reserved == 0 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(200)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "sweeper never released the expired hold");

    handle.stop().await;
    assert_eq!(ledger.engine.get_stock(p1).await.unwrap().available, 10);
    ledger.assert_consistent(p1).await;
}
