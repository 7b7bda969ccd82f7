mod common;

use assert_matches::assert_matches;
use common::TestLedger;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use stateset_stock_ledger::{
    entities::{
        inventory_movement::{self, MovementType},
        inventory_reservation::ReservationType,
    },
    events::Event,
    services::stock_ledger::StockLevel,
    ServiceError,
};
use uuid::Uuid;

fn total(stock: StockLevel) -> i64 {
    stock.available + stock.reserved + stock.sold
}

#[tokio::test]
async fn fulfill_requires_reservation_keyed_to_the_order() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 100).await;
    ledger
        .engine
        .reserve(p1, 30, "cart-A", ReservationType::Cart, 1800)
        .await
        .unwrap();

    // The cart hold is not visible under the order id.
    let err = ledger.engine.fulfill(p1, 30, "order-99").await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientReservedQuantity(_));
    let stock = ledger.engine.get_stock(p1).await.unwrap();
    assert_eq!((stock.available, stock.reserved, stock.sold), (70, 30, 0));

    // Checkout re-keys the hold to the order.
    ledger.engine.release(p1, "cart-A", None).await.unwrap();
    ledger
        .engine
        .reserve(p1, 30, "order-99", ReservationType::Order, 1800)
        .await
        .unwrap();

    let outcome = ledger.engine.fulfill(p1, 30, "order-99").await.unwrap();
    assert_eq!(outcome.quantity, 30);
    assert_eq!(outcome.remaining_reserved, 0);

    let stock = ledger.engine.get_stock(p1).await.unwrap();
    assert_eq!((stock.available, stock.reserved, stock.sold), (70, 0, 30));
    assert!(ledger.engine.list_live(Some(p1)).await.unwrap().is_empty());
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn fulfill_without_any_reservation_fails() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 10).await;

    let err = ledger.engine.fulfill(p1, 1, "order-1").await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientReservedQuantity(_));
    assert_eq!(ledger.engine.get_stock(p1).await.unwrap().available, 10);
}

#[tokio::test]
async fn fulfill_more_than_held_fails_without_changes() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 10).await;
    ledger
        .engine
        .reserve(p1, 4, "order-1", ReservationType::Order, 600)
        .await
        .unwrap();

    let err = ledger.engine.fulfill(p1, 5, "order-1").await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientReservedQuantity(_));

    let stock = ledger.engine.get_stock(p1).await.unwrap();
    assert_eq!((stock.reserved, stock.sold), (4, 0));
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn fulfill_rejects_non_positive_quantity() {
    let ledger = TestLedger::new().await;
    let err = ledger
        .engine
        .fulfill(Uuid::new_v4(), 0, "order-1")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity(_));
}

#[tokio::test]
async fn partial_fulfillment_keeps_the_remainder_held() {
    let mut ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 50).await;
    ledger
        .engine
        .reserve(p1, 6, "order-5", ReservationType::Order, 600)
        .await
        .unwrap();
    ledger
        .engine
        .reserve(p1, 4, "order-5", ReservationType::Order, 600)
        .await
        .unwrap();
    let before = ledger.engine.get_stock(p1).await.unwrap();

    let outcome = ledger.engine.fulfill(p1, 8, "order-5").await.unwrap();
    assert_eq!(outcome.reservations_consumed, 2);
    assert_eq!(outcome.remaining_reserved, 2);

    let live = ledger.engine.list_live(Some(p1)).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].quantity, 2);
    assert_eq!(live[0].reserved_for, "order-5");

    let after = ledger.engine.get_stock(p1).await.unwrap();
    assert_eq!(total(before), total(after));
    assert_eq!(after.available, before.available);
    assert_eq!(after.sold, 8);
    assert_eq!(after.reserved, 2);

    ledger.engine.fulfill(p1, 2, "order-5").await.unwrap();
    let done = ledger.engine.get_stock(p1).await.unwrap();
    assert_eq!((done.reserved, done.sold), (0, 10));
    assert_eq!(total(done), total(before));

    assert!(ledger
        .drain_events()
        .iter()
        .any(|e| matches!(e, Event::ReservationFulfilled { quantity: 8, .. })));
    ledger.assert_consistent(p1).await;
}

#[tokio::test]
async fn fulfill_writes_out_movements_referencing_the_order() {
    let ledger = TestLedger::new().await;
    let p1 = Uuid::new_v4();
    ledger.seed(p1, "SKU1", 10).await;
    ledger
        .engine
        .reserve(p1, 3, "order-42", ReservationType::Order, 600)
        .await
        .unwrap();
    ledger.engine.fulfill(p1, 3, "order-42").await.unwrap();

    let outs = inventory_movement::Entity::find()
        .filter(inventory_movement::Column::ProductId.eq(p1))
        .filter(inventory_movement::Column::MovementType.eq(MovementType::Out))
        .all(ledger.engine.db())
        .await
        .unwrap();
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].quantity, 3);
    assert_eq!(outs[0].reference_id.as_deref(), Some("order-42"));
    assert_eq!(outs[0].reference_type.as_deref(), Some("order"));
}
