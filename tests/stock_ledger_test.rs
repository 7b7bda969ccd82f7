mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestLedger;
use rust_decimal_macros::dec;
use stateset_stock_ledger::{
    entities::inventory_reservation::ReservationType,
    events::Event,
    services::stock_ledger::{
        apply_counter_change, CounterChange, ReceiveStock, StockLevel, COST_PER_UNIT_LIMIT,
    },
    ServiceError,
};
use uuid::Uuid;

#[tokio::test]
async fn receive_creates_row_and_reports_stock() {
    let mut ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();

    let outcome = ledger
        .engine
        .receive_stock(p1, "SKU1", 100, dec!(5.00), "initial stock", "admin", None, None)
        .await
        .unwrap();
    assert!(outcome.created_item);

    let stock = ledger.engine.get_stock(p1).await.unwrap();
    assert_eq!(
        stock,
        StockLevel {
            available: 100,
            reserved: 0,
            sold: 0,
            total: 100
        }
    );

    let events = ledger.drain_events();
    assert_matches!(
        events.first(),
        Some(Event::StockReceived { quantity: 100, created_item: true, .. })
    );
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn get_stock_of_unknown_product_is_zero() {
    let ledger = TestLedger::new().await;
    let stock = ledger.engine.get_stock(Uuid::new_v4()).await.unwrap();
    assert_eq!(stock, StockLevel::default());
}

#[tokio::test]
async fn receive_into_existing_sku_increments_and_updates_cost() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    let first = ledger.seed(p1, "SKU1", 10).await;

    let outcome = ledger
        .engine
        .receive_stock(p1, "SKU1", 15, dec!(6.25), "restock", "admin", None, None)
        .await
        .unwrap();
    assert!(!outcome.created_item);
    assert_eq!(outcome.inventory_item_id, first);

    let items = ledger.engine.ledger().items(p1).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].available, 25);
    assert_eq!(items[0].cost_per_unit, dec!(6.25));
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn receive_rejects_invalid_input() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();

    for quantity in [0, -5] {
        let err = ledger
            .engine
            .receive_stock(p1, "SKU1", quantity, dec!(1), "bad", "admin", None, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidQuantity(_));
    }

    for cost in [dec!(-1), rust_decimal::Decimal::from(COST_PER_UNIT_LIMIT)] {
        let err = ledger
            .engine
            .receive_stock(p1, "SKU1", 1, cost, "bad", "admin", None, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    assert_eq!(ledger.engine.get_stock(p1).await.unwrap(), StockLevel::default());
}

#[tokio::test]
async fn receive_beyond_counter_limit_is_invalid_quantity() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    let item_id = ledger.seed(p1, "SKU1", i32::MAX - 5).await;

    let err = ledger
        .engine
        .receive_stock(p1, "SKU1", 10, dec!(1), "restock", "admin", None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity(_));

    let err = ledger.engine.adjust(p1, 10, "found stock", "admin").await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity(_));

    let items = ledger.engine.ledger().items(p1).await.unwrap();
    assert_eq!(items[0].id, item_id);
    assert_eq!(items[0].available, i32::MAX - 5);
    assert_eq!(items[0].cost_per_unit, dec!(5.00));

    // Exactly reaching the limit is still allowed.
    ledger
        .engine
        .receive_stock(p1, "SKU1", 5, dec!(1), "restock", "admin", None, None)
        .await
        .unwrap();
    assert_eq!(ledger.engine.get_stock(p1).await.unwrap().available, i64::from(i32::MAX));
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn counter_change_from_a_stale_read_is_rejected() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    let item_id = ledger.seed(p1, "SKU1", 3).await;
    let db = ledger.engine.db();

    // Two writers both read available = 3 and each decide to take 2.
    let seen = ledger.engine.ledger().items(p1).await.unwrap()[0].available;
    assert_eq!(seen, 3);

    assert!(apply_counter_change(db, item_id, CounterChange::Reserve(2)).await.unwrap());
    assert!(!apply_counter_change(db, item_id, CounterChange::Reserve(2)).await.unwrap());
    assert!(!apply_counter_change(db, item_id, CounterChange::Debit(seen)).await.unwrap());
    assert!(!apply_counter_change(db, item_id, CounterChange::Sell(3)).await.unwrap());

    let item = &ledger.engine.ledger().items(p1).await.unwrap()[0];
    assert_eq!((item.available, item.reserved, item.sold), (1, 2, 0));
}

#[tokio::test]
async fn receive_refuses_sku_owned_by_another_product() {
    let ledger = TestLedger::new().await;
    let owner = Uuid::new_v4();
    let other = Uuid::new_v4();
    ledger.seed(owner, "SHARED", 5).await;

    let err = ledger
        .engine
        .receive_stock(other, "SHARED", 5, dec!(1), "restock", "admin", None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(ledger.engine.get_stock(owner).await.unwrap().available, 5);
    assert_eq!(ledger.engine.get_stock(other).await.unwrap().available, 0);
}

#[tokio::test]
async fn receive_applies_batch_and_reorder_settings() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    let expires = Utc::now() + Duration::days(90);

    ledger
        .seed_with(
            ReceiveStock::new(p1, "LOT-A", 40, dec!(2.10), "po receipt", "dock")
                .batch("B-2024-01")
                .expires(expires)
                .reorder(15, 60),
        )
        .await;

    let items = ledger.engine.ledger().items(p1).await.unwrap();
    assert_eq!(items[0].batch_number.as_deref(), Some("B-2024-01"));
    assert_eq!(items[0].reorder_point, 15);
    assert_eq!(items[0].reorder_quantity, 60);
    assert_eq!(items[0].location, "default");
    assert!(items[0].expiration_date.is_some());
}

#[tokio::test]
async fn adjust_beyond_available_fails_without_changes() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 100).await;
    ledger
        .engine
        .reserve(p1, 30, "cart-A", ReservationType::Cart, 1800)
        .await
        .unwrap();

    let err = ledger
        .engine
        .adjust(p1, -200, "damaged goods", "admin")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let stock = ledger.engine.get_stock(p1).await.unwrap();
    assert_eq!(stock.available, 70);
    assert_eq!(stock.reserved, 30);
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn adjust_zero_delta_is_invalid() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 10).await;

    let err = ledger.engine.adjust(p1, 0, "noop", "admin").await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity(_));
}

#[tokio::test]
async fn adjust_positive_without_rows_is_not_found() {
    let ledger = TestLedger::new().await;
    let err = ledger
        .engine
        .adjust(Uuid::new_v4(), 5, "found stock", "admin")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn adjust_applies_signed_deltas() {
    let mut ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 50).await;

    ledger.engine.adjust(p1, 7, "cycle count", "admin").await.unwrap();
    ledger.engine.adjust(p1, -12, "shrinkage", "admin").await.unwrap();

    assert_eq!(ledger.engine.get_stock(p1).await.unwrap().available, 45);
    let adjusted: Vec<i32> = ledger
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            Event::StockAdjusted { delta, .. } => Some(delta),
            _ => None,
        })
        .collect();
    assert_eq!(adjusted, vec![7, -12]);
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn negative_adjust_consumes_rows_in_allocation_order() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    let late = ledger
        .seed_with(
            ReceiveStock::new(p1, "LATE", 10, dec!(1), "receipt", "admin")
                .expires(Utc::now() + Duration::days(60)),
        )
        .await;
    let early = ledger
        .seed_with(
            ReceiveStock::new(p1, "EARLY", 4, dec!(1), "receipt", "admin")
                .expires(Utc::now() + Duration::days(20)),
        )
        .await;

    let outcome = ledger.engine.adjust(p1, -6, "damaged", "admin").await.unwrap();
    assert_eq!(outcome.rows, vec![(early, -4), (late, -2)]);

    let items = ledger.engine.ledger().items(p1).await.unwrap();
    let by_id = |id| items.iter().find(|i| i.id == id).unwrap().available;
    assert_eq!(by_id(early), 0);
    assert_eq!(by_id(late), 8);
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn reconcile_reports_consistent_history() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 20).await;
    ledger
        .engine
        .reserve(p1, 8, "order-1", ReservationType::Order, 600)
        .await
        .unwrap();
    ledger.engine.fulfill(p1, 5, "order-1").await.unwrap();
    ledger.engine.adjust(p1, -2, "shrinkage", "admin").await.unwrap();

    let report = ledger.engine.reconcile(p1).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.counters.available, 10);
    assert_eq!(report.counters.reserved, 3);
    assert_eq!(report.counters.sold, 5);
    assert_eq!(report.live_reserved, 3);
    assert_eq!(report.ledger.sold, 5);
}
