//! Shared test harness for order store backends
//!
//! Provides the bakery order fixture, helpers that drive the writers through a
//! transaction, and assertions over the persisted snapshot.
//!
//! # Usage
//!
//! From any integration test file in `tests/`:
//! ```rust,ignore
//! #[macro_use]
//! mod store_harness;
//! use store_harness::*;
//!
//! order_store_tests!(InMemoryOrderStore::new());
//! ```

#![allow(dead_code)]

#[macro_use]
mod order_store_tests;

use bakery_orders::core::money::{ExchangeRate, MoneyPair};
use bakery_orders::core::order::{
    NewOrder, NewOrderItem, OrderId, OrderNumber, OrderSnapshot, OrderStatus,
};
use bakery_orders::core::store::OrderTransaction;
use bakery_orders::workflow::{assign_distributor, create_order, create_order_item};
use chrono::Utc;
use rust_decimal_macros::dec;

pub const DISTRIBUTOR_ID: u64 = 1;

/// Order number unique within the test process
pub fn fresh_number(tag: &str) -> OrderNumber {
    OrderNumber::generate(&format!("TEST-{}", tag))
}

pub fn rate() -> ExchangeRate {
    ExchangeRate::new(dec!(100))
}

/// Store 1, bread 5 × 20.00 (cost 12.00) and croissants 3 × 20.00
pub fn bakery_order(order_number: OrderNumber) -> NewOrder {
    NewOrder {
        order_number,
        store_id: 1,
        store_name: "Test Store".to_string(),
        order_date: Utc::now(),
        commission_rate: dec!(0.05),
        notes: Some("harness".to_string()),
        created_by: Some(1),
        created_by_name: Some("Admin".to_string()),
        items: vec![
            NewOrderItem {
                product_id: 1,
                product_name: "Bread".to_string(),
                quantity: 5,
                unit_price: dec!(20.00),
                unit_cost: Some(dec!(12.00)),
            },
            NewOrderItem {
                product_id: 2,
                product_name: "Croissant".to_string(),
                quantity: 3,
                unit_price: dec!(20.00),
                unit_cost: None,
            },
        ],
    }
}

/// Write the order, every line and the assignment; the caller decides the end
pub async fn write_order<T: OrderTransaction>(tx: &mut T, order: &NewOrder) -> OrderId {
    let rate = rate();
    let order_id = create_order(tx, order, &rate)
        .await
        .expect("Failed to insert order");
    for item in &order.items {
        create_order_item(tx, order_id, item, &rate)
            .await
            .expect("Failed to insert order item");
    }
    assign_distributor(tx, order_id, DISTRIBUTOR_ID, OrderStatus::Confirmed)
        .await
        .expect("Failed to assign distributor");
    order_id
}

/// Header totals agree with the lines, and every line agrees with itself
pub fn assert_consistent(snapshot: &OrderSnapshot) {
    for item in &snapshot.items {
        assert!(
            item.is_consistent(),
            "Line {} total {:?} != {:?} × {}",
            item.id,
            item.total_price,
            item.unit_price,
            item.quantity
        );
        assert_eq!(item.order_id, snapshot.order.id);
    }
    let sum: MoneyPair = snapshot.items.iter().map(|item| item.total_price).sum();
    assert_eq!(snapshot.order.total_amount, sum);
}

/// The bakery fixture as it must look after commit
pub fn assert_bakery_snapshot(snapshot: &OrderSnapshot) {
    assert_consistent(snapshot);
    assert_eq!(snapshot.items.len(), 2);
    assert_eq!(snapshot.order.status, OrderStatus::Confirmed);
    assert_eq!(snapshot.order.distributor_id, Some(DISTRIBUTOR_ID));
    assert_eq!(
        snapshot.order.total_amount,
        MoneyPair::new(dec!(160.00), dec!(16000.00))
    );
    assert_eq!(
        snapshot.order.total_cost,
        MoneyPair::new(dec!(60.00), dec!(6000.00))
    );
    assert_eq!(
        snapshot.order.commission,
        MoneyPair::new(dec!(8.00), dec!(800.00))
    );

    let bread = snapshot
        .items
        .iter()
        .find(|item| item.product_id == 1)
        .expect("Bread line missing");
    assert_eq!(bread.quantity, 5);
    assert_eq!(bread.total_price, MoneyPair::new(dec!(100.00), dec!(10000.00)));

    let croissant = snapshot
        .items
        .iter()
        .find(|item| item.product_id == 2)
        .expect("Croissant line missing");
    assert_eq!(croissant.quantity, 3);
    assert_eq!(croissant.total_price, MoneyPair::new(dec!(60.00), dec!(6000.00)));
}
