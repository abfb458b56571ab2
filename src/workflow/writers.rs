//! Order, line-item and assignment writers
//!
//! Each writer takes the open transaction explicitly. Monetary aggregates are
//! computed here, not by the caller, so every row written satisfies
//! `total = unit × quantity` in both currencies. Input that breaks a field
//! rule, a non-positive rate, or an amount outside `DECIMAL(12,2)` is
//! rejected as [`StoreErrorKind::ConstraintViolation`] before the store is
//! touched.

use crate::core::error::{StoreError, StoreErrorKind, ValidationError};
use crate::core::money::{ExchangeRate, MoneyPair};
use crate::core::order::{
    NewOrder, NewOrderItem, OrderId, OrderItemRow, OrderRow, OrderStatus, PaymentStatus,
};
use crate::core::store::OrderTransaction;
use chrono::{DateTime, Utc};

fn rejected(err: ValidationError) -> StoreError {
    StoreError::new("input", StoreErrorKind::ConstraintViolation, err.to_string())
}

/// Per-order monetary aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub amount: MoneyPair,
    pub cost: MoneyPair,
    pub commission: MoneyPair,
}

/// Unit price and line total of one item
pub fn line_amounts(item: &NewOrderItem, rate: &ExchangeRate) -> (MoneyPair, MoneyPair) {
    let unit = rate.pair(item.unit_price);
    (unit, unit.times(item.quantity))
}

pub fn order_totals(order: &NewOrder, rate: &ExchangeRate) -> OrderTotals {
    let amount: MoneyPair = order
        .items
        .iter()
        .map(|item| line_amounts(item, rate).1)
        .sum();
    let cost: MoneyPair = order
        .items
        .iter()
        .filter_map(|item| item.unit_cost.map(|c| rate.pair(c).times(item.quantity)))
        .sum();

    OrderTotals {
        amount,
        cost,
        commission: amount.scale(order.commission_rate),
    }
}

pub fn build_order_row(order: &NewOrder, rate: &ExchangeRate, now: DateTime<Utc>) -> OrderRow {
    let totals = order_totals(order, rate);
    OrderRow {
        order_number: order.order_number.clone(),
        store_id: order.store_id,
        store_name: order.store_name.clone(),
        order_date: order.order_date,
        total_amount: totals.amount,
        total_cost: totals.cost,
        commission: totals.commission,
        status: OrderStatus::Draft,
        payment_status: PaymentStatus::Pending,
        notes: order.notes.clone(),
        created_by: order.created_by,
        created_by_name: order.created_by_name.clone(),
        created_at: now,
        updated_at: now,
    }
}

pub fn build_item_row(
    order_id: OrderId,
    item: &NewOrderItem,
    rate: &ExchangeRate,
    now: DateTime<Utc>,
) -> OrderItemRow {
    let (unit_price, total_price) = line_amounts(item, rate);
    OrderItemRow {
        order_id,
        product_id: item.product_id,
        product_name: item.product_name.clone(),
        quantity: item.quantity,
        unit_price,
        total_price,
        created_at: now,
    }
}

/// Insert the order header in `draft` / `pending` and return its id
pub async fn create_order<T: OrderTransaction>(
    tx: &mut T,
    order: &NewOrder,
    rate: &ExchangeRate,
) -> Result<OrderId, StoreError> {
    order.check(rate).map_err(rejected)?;
    let row = build_order_row(order, rate, Utc::now());
    tx.insert_order(&row).await
}

/// Insert one line of `order_id`
pub async fn create_order_item<T: OrderTransaction>(
    tx: &mut T,
    order_id: OrderId,
    item: &NewOrderItem,
    rate: &ExchangeRate,
) -> Result<(), StoreError> {
    item.priced(rate).map_err(rejected)?;
    let row = build_item_row(order_id, item, rate, Utc::now());
    tx.insert_order_item(&row).await
}

/// Attach a distributor and move the order to `status`
pub async fn assign_distributor<T: OrderTransaction>(
    tx: &mut T,
    order_id: OrderId,
    distributor_id: u64,
    status: OrderStatus,
) -> Result<(), StoreError> {
    tx.update_assignment(order_id, distributor_id, status, Utc::now())
        .await
}
