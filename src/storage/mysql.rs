//! MySQL storage backend using sqlx.
//!
//! Provides `MysqlOrderStore` and `MysqlTransaction`, backed by a
//! `sqlx::MySqlPool`.
//!
//! # Feature flag
//!
//! This module is gated behind the `mysql` feature flag:
//! ```toml
//! [dependencies]
//! bakery-orders = { version = "0.1", features = ["mysql"] }
//! ```
//!
//! # Schema
//!
//! Orders live in `orders` (UNIQUE `order_number`) and their lines in
//! `order_items` (FOREIGN KEY to `orders.id`). Every amount is stored twice,
//! `*_primary` and `*_secondary`, as `DECIMAL(12,2)`.
//!
//! # Transactions
//!
//! A transaction pins one pooled connection. Isolation level and
//! `innodb_lock_wait_timeout` are set on that connection before
//! `START TRANSACTION`; MySQL rejects `SET TRANSACTION` once a transaction is
//! open, and `Pool::begin` acquires and begins in one step, so the handle
//! drives the transaction statements itself. A handle dropped without
//! `commit` or `rollback` (including a commit cut short by a timeout) rolls
//! back in the background and then returns its connection to the pool.

use crate::config::DatabaseConfig;
use crate::core::error::{StoreError, StoreErrorKind, classify_mysql_error_number};
use crate::core::money::MoneyPair;
use crate::core::order::{
    Order, OrderId, OrderItem, OrderItemRow, OrderNumber, OrderRow, OrderSnapshot, OrderStatus,
};
use crate::core::store::{CleanupReport, OrderStore, OrderTransaction, TransactionOptions};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::mysql::{
    MySql, MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlPool, MySqlPoolOptions,
    MySqlRow,
};
use sqlx::pool::PoolConnection;
use sqlx::Row;

const BACKEND: &str = "mysql";

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map a sqlx error onto the closed [`StoreErrorKind`] set
pub fn classify(err: &sqlx::Error) -> StoreErrorKind {
    match err {
        sqlx::Error::Database(db) => match db.try_downcast_ref::<MySqlDatabaseError>() {
            Some(mysql) => classify_mysql_error_number(mysql.number()),
            None => match db.kind() {
                ErrorKind::UniqueViolation => StoreErrorKind::UniqueViolation,
                ErrorKind::ForeignKeyViolation => StoreErrorKind::ForeignKeyViolation,
                ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                    StoreErrorKind::ConstraintViolation
                }
                _ => StoreErrorKind::Other,
            },
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreErrorKind::Connectivity,
        sqlx::Error::RowNotFound => StoreErrorKind::NotFound,
        _ => StoreErrorKind::Other,
    }
}

fn store_error(context: &str, err: sqlx::Error) -> StoreError {
    StoreError::new(BACKEND, classify(&err), format!("{}: {}", context, err))
}

// ---------------------------------------------------------------------------
// Schema management
// ---------------------------------------------------------------------------

/// Apply the required tables and indexes (idempotent).
///
/// This creates:
/// - `orders` with a unique `order_number`
/// - `order_items` referencing `orders(id)`, cascading on delete
///
/// Safe to call on every startup.
pub async fn ensure_schema(pool: &MySqlPool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS orders (
            id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
            order_number VARCHAR(64) NOT NULL,
            store_id BIGINT UNSIGNED NOT NULL,
            store_name VARCHAR(255) NOT NULL,
            order_date DATETIME(6) NOT NULL,
            total_amount_primary DECIMAL(12,2) NOT NULL DEFAULT 0,
            total_amount_secondary DECIMAL(12,2) NOT NULL DEFAULT 0,
            total_cost_primary DECIMAL(12,2) NOT NULL DEFAULT 0,
            total_cost_secondary DECIMAL(12,2) NOT NULL DEFAULT 0,
            commission_primary DECIMAL(12,2) NOT NULL DEFAULT 0,
            commission_secondary DECIMAL(12,2) NOT NULL DEFAULT 0,
            status VARCHAR(32) NOT NULL DEFAULT 'draft',
            payment_status VARCHAR(32) NOT NULL DEFAULT 'pending',
            distributor_id BIGINT UNSIGNED NULL,
            notes TEXT NULL,
            created_by BIGINT UNSIGNED NULL,
            created_by_name VARCHAR(255) NULL,
            created_at DATETIME(6) NOT NULL,
            updated_at DATETIME(6) NOT NULL,
            UNIQUE KEY uq_orders_order_number (order_number),
            INDEX idx_orders_store (store_id),
            INDEX idx_orders_distributor (distributor_id)
        ) ENGINE=InnoDB",
    )
    .execute(pool)
    .await
    .map_err(|e| store_error("Failed to create orders table", e))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS order_items (
            id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
            order_id BIGINT UNSIGNED NOT NULL,
            product_id BIGINT UNSIGNED NOT NULL,
            product_name VARCHAR(255) NOT NULL,
            quantity INT UNSIGNED NOT NULL,
            unit_price_primary DECIMAL(12,2) NOT NULL,
            unit_price_secondary DECIMAL(12,2) NOT NULL,
            total_price_primary DECIMAL(12,2) NOT NULL,
            total_price_secondary DECIMAL(12,2) NOT NULL,
            created_at DATETIME(6) NOT NULL,
            updated_at DATETIME(6) NOT NULL,
            INDEX idx_order_items_order (order_id),
            CONSTRAINT fk_order_items_order FOREIGN KEY (order_id)
                REFERENCES orders (id) ON DELETE CASCADE
        ) ENGINE=InnoDB",
    )
    .execute(pool)
    .await
    .map_err(|e| store_error("Failed to create order_items table", e))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

const ORDER_COLUMNS: &str = "id, order_number, store_id, store_name, order_date, \
     total_amount_primary, total_amount_secondary, total_cost_primary, total_cost_secondary, \
     commission_primary, commission_secondary, status, payment_status, distributor_id, notes, \
     created_by, created_by_name, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, quantity, \
     unit_price_primary, unit_price_secondary, total_price_primary, total_price_secondary";

fn money(row: &MySqlRow, prefix: &str) -> Result<MoneyPair, sqlx::Error> {
    Ok(MoneyPair::new(
        row.try_get(format!("{}_primary", prefix).as_str())?,
        row.try_get(format!("{}_secondary", prefix).as_str())?,
    ))
}

fn decode_order(row: &MySqlRow) -> Result<Order, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let payment_status: String = row.try_get("payment_status")?;
    let order_number: String = row.try_get("order_number")?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        order_number: OrderNumber::from(order_number),
        store_id: row.try_get("store_id")?,
        store_name: row.try_get("store_name")?,
        order_date: row.try_get("order_date")?,
        total_amount: money(row, "total_amount")?,
        total_cost: money(row, "total_cost")?,
        commission: money(row, "commission")?,
        status: status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        payment_status: payment_status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        distributor_id: row.try_get("distributor_id")?,
        notes: row.try_get("notes")?,
        created_by: row.try_get("created_by")?,
        created_by_name: row.try_get("created_by_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_item(row: &MySqlRow) -> Result<OrderItem, sqlx::Error> {
    Ok(OrderItem {
        id: row.try_get("id")?,
        order_id: OrderId(row.try_get("order_id")?),
        product_id: row.try_get("product_id")?,
        product_name: row.try_get("product_name")?,
        quantity: row.try_get("quantity")?,
        unit_price: money(row, "unit_price")?,
        total_price: money(row, "total_price")?,
    })
}

// ---------------------------------------------------------------------------
// MysqlOrderStore
// ---------------------------------------------------------------------------

/// Order store backed by a MySQL connection pool.
///
/// # Example
///
/// ```rust,ignore
/// use bakery_orders::config::WorkflowConfig;
/// use bakery_orders::storage::MysqlOrderStore;
///
/// let config = WorkflowConfig::from_env()?;
/// let store = MysqlOrderStore::connect(&config.database).await?;
/// store.ping().await?;
/// ```
#[derive(Clone, Debug)]
pub struct MysqlOrderStore {
    pool: MySqlPool,
}

impl MysqlOrderStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Open a bounded pool and establish the first connection
    ///
    /// Every connection gets the configured charset, collation and time
    /// zone. Failing to reach or authenticate against the server within
    /// the connect timeout is reported as [`StoreErrorKind::Connectivity`].
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .charset(&config.charset)
            .collation(&config.collation)
            .timezone(Some(config.timezone.clone()));

        let pool_options = MySqlPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .min_connections(config.pool.min_connections)
            .acquire_timeout(config.pool.acquire_timeout)
            .idle_timeout(Some(config.pool.idle_timeout));

        let address = format!("{}:{}/{}", config.host, config.port, config.name);
        let pool = tokio::time::timeout(config.connect_timeout, pool_options.connect_with(options))
            .await
            .map_err(|_| {
                StoreError::connectivity(
                    BACKEND,
                    format!(
                        "Timed out after {:?} connecting to {}",
                        config.connect_timeout, address
                    ),
                )
            })?
            .map_err(|e| {
                StoreError::connectivity(BACKEND, format!("Failed to connect to {}: {}", address, e))
            })?;

        tracing::info!(
            address = %address,
            max_connections = config.pool.max_connections,
            min_connections = config.pool.min_connections,
            "MySQL pool established"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl OrderStore for MysqlOrderStore {
    type Transaction = MysqlTransaction;

    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::connectivity(BACKEND, format!("Ping failed: {}", e)))?;
        Ok(())
    }

    async fn begin(&self, options: &TransactionOptions) -> Result<MysqlTransaction, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            StoreError::connectivity(BACKEND, format!("Failed to acquire connection: {}", e))
        })?;

        let lock_wait = format!(
            "SET SESSION innodb_lock_wait_timeout = {}",
            options.lock_wait_timeout.as_secs().max(1)
        );
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&lock_wait))
            .await
            .map_err(|e| store_error("Failed to set lock wait timeout", e))?;

        let isolation = format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            options.isolation_level.as_sql()
        );
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&isolation))
            .await
            .map_err(|e| store_error("Failed to set isolation level", e))?;

        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql("START TRANSACTION"))
            .await
            .map_err(|e| store_error("Failed to start transaction", e))?;

        Ok(MysqlTransaction { conn: Some(conn) })
    }

    async fn find_order_by_number(
        &self,
        order_number: &OrderNumber,
    ) -> Result<Option<OrderSnapshot>, StoreError> {
        let sql = format!("SELECT {} FROM orders WHERE order_number = ?", ORDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(order_number.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to get order", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let order = decode_order(&row).map_err(|e| store_error("Failed to decode order", e))?;

        let sql = format!(
            "SELECT {} FROM order_items WHERE order_id = ? ORDER BY id",
            ITEM_COLUMNS
        );
        let items = sqlx::query(&sql)
            .bind(order.id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to list order items", e))?
            .iter()
            .map(decode_item)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| store_error("Failed to decode order item", e))?;

        Ok(Some(OrderSnapshot { order, items }))
    }

    async fn delete_order_by_number(
        &self,
        order_number: &OrderNumber,
    ) -> Result<CleanupReport, StoreError> {
        let items = sqlx::query(
            "DELETE oi FROM order_items oi \
             INNER JOIN orders o ON o.id = oi.order_id \
             WHERE o.order_number = ?",
        )
        .bind(order_number.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("Failed to delete order items", e))?;

        let orders = sqlx::query("DELETE FROM orders WHERE order_number = ?")
            .bind(order_number.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("Failed to delete order", e))?;

        Ok(CleanupReport {
            orders_deleted: orders.rows_affected(),
            items_deleted: items.rows_affected(),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// MysqlTransaction
// ---------------------------------------------------------------------------

/// An open MySQL transaction pinned to one pooled connection
pub struct MysqlTransaction {
    conn: Option<PoolConnection<MySql>>,
}

impl MysqlTransaction {
    fn conn(&mut self) -> Result<&mut MySqlConnection, StoreError> {
        self.conn.as_deref_mut().ok_or_else(|| {
            StoreError::new(BACKEND, StoreErrorKind::Other, "Transaction already finished")
        })
    }

    /// Send COMMIT or ROLLBACK and release the connection
    ///
    /// The connection stays on the handle while the statement runs, so a
    /// cancelled call still rolls back through `Drop`.
    async fn finish(mut self, statement: &'static str) -> Result<(), StoreError> {
        let result = sqlx::Executor::execute(self.conn()?, sqlx::raw_sql(statement)).await;

        let conn = self.conn.take();
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                // The server ends the transaction on a failed COMMIT, but the
                // session state is unknown
                if let Some(conn) = conn {
                    drop(conn.detach());
                }
                Err(store_error(&format!("{} failed", statement), e))
            }
        }
    }
}

impl Drop for MysqlTransaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        tracing::warn!("MySQL transaction dropped while open, rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql("ROLLBACK")).await {
                        tracing::warn!(error = %e, "Background rollback failed, discarding connection");
                        drop(conn.detach());
                    }
                });
            }
            // Closing the connection makes the server roll back
            Err(_) => drop(conn.detach()),
        }
    }
}

#[async_trait]
impl OrderTransaction for MysqlTransaction {
    async fn insert_order(&mut self, row: &OrderRow) -> Result<OrderId, StoreError> {
        let result = sqlx::query(
            "INSERT INTO orders (order_number, store_id, store_name, order_date, \
             total_amount_primary, total_amount_secondary, total_cost_primary, total_cost_secondary, \
             commission_primary, commission_secondary, status, payment_status, notes, \
             created_by, created_by_name, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.order_number.as_str())
        .bind(row.store_id)
        .bind(&row.store_name)
        .bind(row.order_date)
        .bind(row.total_amount.primary)
        .bind(row.total_amount.secondary)
        .bind(row.total_cost.primary)
        .bind(row.total_cost.secondary)
        .bind(row.commission.primary)
        .bind(row.commission.secondary)
        .bind(row.status.as_str())
        .bind(row.payment_status.as_str())
        .bind(&row.notes)
        .bind(row.created_by)
        .bind(&row.created_by_name)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(|e| store_error("Failed to insert order", e))?;

        // MySQL doesn't support RETURNING, the generated key comes back on the result
        Ok(OrderId(result.last_insert_id()))
    }

    async fn insert_order_item(&mut self, row: &OrderItemRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO order_items (order_id, product_id, product_name, quantity, \
             unit_price_primary, unit_price_secondary, total_price_primary, total_price_secondary, \
             created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.order_id.0)
        .bind(row.product_id)
        .bind(&row.product_name)
        .bind(row.quantity)
        .bind(row.unit_price.primary)
        .bind(row.unit_price.secondary)
        .bind(row.total_price.primary)
        .bind(row.total_price.secondary)
        .bind(row.created_at)
        .bind(row.created_at)
        .execute(self.conn()?)
        .await
        .map_err(|e| store_error("Failed to insert order item", e))?;

        Ok(())
    }

    async fn update_assignment(
        &mut self,
        order_id: OrderId,
        distributor_id: u64,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET distributor_id = ?, status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(distributor_id)
        .bind(status.as_str())
        .bind(updated_at)
        .bind(order_id.0)
        .execute(self.conn()?)
        .await
        .map_err(|e| store_error("Failed to assign distributor", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::new(
                BACKEND,
                StoreErrorKind::NotFound,
                format!("Order {} not found", order_id),
            ));
        }

        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.finish("COMMIT").await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.finish("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_connectivity() {
        assert_eq!(
            classify(&sqlx::Error::PoolTimedOut),
            StoreErrorKind::Connectivity
        );
        assert_eq!(
            classify(&sqlx::Error::PoolClosed),
            StoreErrorKind::Connectivity
        );
    }

    #[test]
    fn test_row_not_found_is_not_found() {
        assert_eq!(classify(&sqlx::Error::RowNotFound), StoreErrorKind::NotFound);
    }

    #[test]
    fn test_io_error_is_connectivity() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify(&sqlx::Error::Io(io)), StoreErrorKind::Connectivity);
    }
}
