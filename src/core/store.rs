//! Store traits for transactional order writes
//!
//! A store hands out explicit transaction handles. Every write in the
//! workflow takes the handle as a parameter; there is no ambient transaction.
//! The storage mechanism behind the traits is opaque to the workflow.

use crate::core::error::StoreError;
use crate::core::order::{OrderId, OrderItemRow, OrderNumber, OrderRow, OrderSnapshot, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, as used in `SET TRANSACTION ISOLATION LEVEL ...`
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    /// Accepts `READ COMMITTED`, `read_committed`, `read-committed`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "READ UNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "READ COMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLE READ" => Ok(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            _ => Err(format!("unknown isolation level '{}'", s)),
        }
    }
}

/// Options fixed when a transaction begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    /// Budget for all writes inside the transaction
    pub timeout: Duration,
    /// How long a single statement may wait for a row lock
    pub lock_wait_timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::ReadCommitted,
            timeout: Duration::from_secs(30),
            lock_wait_timeout: Duration::from_secs(50),
        }
    }
}

/// Result of a best-effort cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CleanupReport {
    pub orders_deleted: u64,
    pub items_deleted: u64,
}

impl CleanupReport {
    pub fn is_noop(&self) -> bool {
        self.orders_deleted == 0 && self.items_deleted == 0
    }
}

/// An open transaction
///
/// `commit` and `rollback` consume the handle: once one of them is called
/// the handle is gone, so a second terminal call does not compile.
#[async_trait]
pub trait OrderTransaction: Send {
    /// Insert an order header and return its generated id
    async fn insert_order(&mut self, row: &OrderRow) -> Result<OrderId, StoreError>;

    /// Insert one order line
    async fn insert_order_item(&mut self, row: &OrderItemRow) -> Result<(), StoreError>;

    /// Attach a distributor to an order and move it to `status`
    async fn update_assignment(
        &mut self,
        order_id: OrderId,
        distributor_id: u64,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Make every write visible to other transactions
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every write
    async fn rollback(self) -> Result<(), StoreError>;
}

/// A pooled store that can begin transactions
#[async_trait]
pub trait OrderStore: Send + Sync {
    type Transaction: OrderTransaction;

    /// Short backend name used in logs and errors
    fn backend(&self) -> &'static str;

    /// Acquire a working connection and release it again
    async fn ping(&self) -> Result<(), StoreError>;

    /// Begin a transaction with the given options
    async fn begin(&self, options: &TransactionOptions) -> Result<Self::Transaction, StoreError>;

    /// Read an order and its lines by order number, outside any transaction
    async fn find_order_by_number(
        &self,
        order_number: &OrderNumber,
    ) -> Result<Option<OrderSnapshot>, StoreError>;

    /// Delete an order and its lines if they exist, outside any transaction
    async fn delete_order_by_number(
        &self,
        order_number: &OrderNumber,
    ) -> Result<CleanupReport, StoreError>;

    /// Release every pooled connection
    async fn close(&self);
}
