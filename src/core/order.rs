//! Order and order-item model
//!
//! Input types (`NewOrder`, `NewOrderItem`) are what a caller hands to the
//! writers; row types (`OrderRow`, `OrderItemRow`) are what the writers hand
//! to a store; `Order` / `OrderItem` are what a store reads back.

use crate::core::error::ValidationError;
use crate::core::money::{ExchangeRate, MAX_AMOUNT, MoneyPair};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use validator::Validate;

/// Longest order number the `orders.order_number` column accepts
pub const ORDER_NUMBER_MAX_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Store-generated order identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static LAST_ISSUED_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Unique order number, `<prefix>-<epoch millis>`
///
/// Also serves as the idempotency key when a transaction is retried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Generate a fresh number from the current time
    pub fn generate(prefix: &str) -> Self {
        Self::generate_at(prefix, Utc::now())
    }

    /// Generate a number from `now`, never reissuing a token within the process
    ///
    /// Two calls in the same millisecond get consecutive tokens.
    pub fn generate_at(prefix: &str, now: DateTime<Utc>) -> Self {
        let millis = now.timestamp_millis();
        let previous = match LAST_ISSUED_MILLIS.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |last| Some(millis.max(last + 1)),
        ) {
            Ok(prev) | Err(prev) => prev,
        };
        let token = millis.max(previous + 1);
        Self(format!("{}-{}", prefix, token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderNumber {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OrderNumber {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Draft,
    Confirmed,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(OrderStatus::Draft),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "in_transit" => Ok(OrderStatus::InTransit),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

/// Payment status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "partial" => Ok(PaymentStatus::Partial),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

fn money_amount(value: &Decimal) -> Result<(), validator::ValidationError> {
    if *value < Decimal::ZERO {
        return Err(validator::ValidationError::new("non_negative"));
    }
    if *value > MAX_AMOUNT {
        return Err(validator::ValidationError::new("max_amount"));
    }
    Ok(())
}

fn fraction(value: &Decimal) -> Result<(), validator::ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE {
        return Err(validator::ValidationError::new("fraction"));
    }
    Ok(())
}

fn positive_rate(rate: &ExchangeRate) -> Result<(), ValidationError> {
    if rate.is_positive() {
        return Ok(());
    }
    Err(ValidationError::Rule {
        message: format!(
            "exchange rate must be positive, got {}",
            rate.secondary_per_primary
        ),
    })
}

fn within_column(
    value: Option<MoneyPair>,
    what: impl FnOnce() -> String,
) -> Result<MoneyPair, ValidationError> {
    value
        .filter(MoneyPair::fits_column)
        .ok_or_else(|| ValidationError::Rule {
            message: format!("{} exceeds the storable maximum of {}", what(), MAX_AMOUNT),
        })
}

fn well_formed_order_number(value: &OrderNumber) -> Result<(), validator::ValidationError> {
    let s = value.as_str();
    if s.trim().is_empty() || s.len() > ORDER_NUMBER_MAX_LEN {
        return Err(validator::ValidationError::new("order_number"));
    }
    Ok(())
}

/// One requested order line, prices in the primary currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewOrderItem {
    #[validate(range(min = 1))]
    pub product_id: u64,

    /// Snapshot of the product name at order time
    #[validate(length(min = 1, max = 255))]
    pub product_name: String,

    #[validate(range(min = 1))]
    pub quantity: u32,

    #[validate(custom(function = "money_amount"))]
    pub unit_price: Decimal,

    /// Purchase cost per unit, used for the order's total cost
    #[serde(default)]
    #[validate(custom(function = "money_amount"))]
    pub unit_cost: Option<Decimal>,
}

/// A complete order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewOrder {
    #[validate(custom(function = "well_formed_order_number"))]
    pub order_number: OrderNumber,

    /// Existence is the caller's responsibility
    #[validate(range(min = 1))]
    pub store_id: u64,

    #[validate(length(min = 1, max = 255))]
    pub store_name: String,

    pub order_date: DateTime<Utc>,

    /// Fraction of the total amount paid as commission (0.05 = 5%)
    #[validate(custom(function = "fraction"))]
    pub commission_rate: Decimal,

    pub notes: Option<String>,

    pub created_by: Option<u64>,

    pub created_by_name: Option<String>,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub items: Vec<NewOrderItem>,
}

impl NewOrderItem {
    /// Unit price and line total under `rate`, each checked to fit its column
    pub fn priced(&self, rate: &ExchangeRate) -> Result<(MoneyPair, MoneyPair), ValidationError> {
        self.validate()?;
        positive_rate(rate)?;
        self.amounts(rate)
    }

    fn amounts(&self, rate: &ExchangeRate) -> Result<(MoneyPair, MoneyPair), ValidationError> {
        let unit = within_column(rate.checked_pair(self.unit_price), || {
            format!("unit price of product {}", self.product_id)
        })?;
        let line = within_column(unit.checked_times(self.quantity), || {
            format!("line total of product {}", self.product_id)
        })?;
        Ok((unit, line))
    }

    fn cost(&self, rate: &ExchangeRate) -> Result<MoneyPair, ValidationError> {
        let Some(unit_cost) = self.unit_cost else {
            return Ok(MoneyPair::ZERO);
        };
        let cost = rate
            .checked_pair(unit_cost)
            .and_then(|unit| unit.checked_times(self.quantity));
        within_column(cost, || format!("cost of product {}", self.product_id))
    }
}

impl NewOrder {
    /// Check the field rules, then the rules that need the order priced at
    /// `rate`: a positive rate, and every line and aggregate within
    /// `DECIMAL(12,2)` in both currencies.
    pub fn check(&self, rate: &ExchangeRate) -> Result<(), ValidationError> {
        self.validate()?;
        positive_rate(rate)?;

        let mut amount = MoneyPair::ZERO;
        let mut cost = MoneyPair::ZERO;
        for item in &self.items {
            let (_, line) = item.amounts(rate)?;
            amount = within_column(amount.checked_add(line), || "order total".to_string())?;
            let line_cost = item.cost(rate)?;
            cost = within_column(cost.checked_add(line_cost), || "order cost".to_string())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rows written by the writers
// ---------------------------------------------------------------------------

/// Order header as inserted by the order writer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRow {
    pub order_number: OrderNumber,
    pub store_id: u64,
    pub store_name: String,
    pub order_date: DateTime<Utc>,
    pub total_amount: MoneyPair,
    pub total_cost: MoneyPair,
    pub commission: MoneyPair,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub created_by: Option<u64>,
    pub created_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order line as inserted by the line-item writer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderItemRow {
    pub order_id: OrderId,
    pub product_id: u64,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: MoneyPair,
    pub total_price: MoneyPair,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Rows read back from a store
// ---------------------------------------------------------------------------

/// A persisted order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub store_id: u64,
    pub store_name: String,
    pub order_date: DateTime<Utc>,
    pub total_amount: MoneyPair,
    pub total_cost: MoneyPair,
    pub commission: MoneyPair,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub distributor_id: Option<u64>,
    pub notes: Option<String>,
    pub created_by: Option<u64>,
    pub created_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_row(id: OrderId, row: OrderRow) -> Self {
        Self {
            id,
            order_number: row.order_number,
            store_id: row.store_id,
            store_name: row.store_name,
            order_date: row.order_date,
            total_amount: row.total_amount,
            total_cost: row.total_cost,
            commission: row.commission,
            status: row.status,
            payment_status: row.payment_status,
            distributor_id: None,
            notes: row.notes,
            created_by: row.created_by,
            created_by_name: row.created_by_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A persisted order line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderItem {
    pub id: u64,
    pub order_id: OrderId,
    pub product_id: u64,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: MoneyPair,
    pub total_price: MoneyPair,
}

impl OrderItem {
    /// `total_price == unit_price × quantity` in both currencies
    pub fn is_consistent(&self) -> bool {
        self.unit_price.times(self.quantity) == self.total_price
    }
}

/// An order together with its lines
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSnapshot {
    pub order: Order,
    pub items: Vec<OrderItem>,
}
