//! # Bakery Orders
//!
//! Transactional order creation for a bakery distribution back office.
//!
//! An order, its line items and its distributor assignment are written in a
//! single explicit transaction. The transaction either commits as a whole or
//! rolls back, and the outcome is classified so lock contention can be told
//! apart from bad data.
//!
//! ## Features
//!
//! - **Explicit transactions**: every writer takes the open handle as a parameter
//! - **Two-currency amounts**: every price and total is stored as a primary/secondary pair
//! - **Classified failures**: vendor error codes map to a closed [`StoreErrorKind`](core::StoreErrorKind)
//! - **Lock timeout signal**: distinct from a generic rollback, optionally retried
//! - **Best-effort cleanup**: rows are removed by order number after every run
//! - **Pluggable stores**: in-memory for tests, MySQL behind the `mysql` feature
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bakery_orders::prelude::*;
//!
//! let config = WorkflowConfig::from_env()?;
//! let store = MysqlOrderStore::connect(&config.database).await?;
//!
//! let workflow = OrderCreationWorkflow::from_scenario(&OrderScenario::bakery_default(), &config);
//! match workflow.execute(&store).await {
//!     Ok(report) => println!("committed {}", report.order_number),
//!     Err(e) => eprintln!("{} ({})", e, e.error_code()),
//! }
//! ```

pub mod config;
pub mod core;
pub mod storage;
pub mod workflow;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        CleanupReport, ConfigError, ExchangeRate, IsolationLevel, MoneyPair, NewOrder,
        NewOrderItem, Order, OrderId, OrderItem, OrderNumber, OrderSnapshot, OrderStatus,
        OrderStore, OrderTransaction, PaymentStatus, StoreError, StoreErrorKind,
        TransactionOptions, ValidationError, WorkflowError,
    };

    // === Workflow ===
    pub use crate::workflow::{
        CheckOutcome, CleanupOutcome, OrderCreationWorkflow, OrderScenario, OutcomeSignal, RunReport,
        TransactionState, assign_distributor, create_order, create_order_item, run_check,
    };

    // === Storage ===
    pub use crate::storage::InMemoryOrderStore;
    #[cfg(feature = "mysql")]
    pub use crate::storage::MysqlOrderStore;

    // === Config ===
    pub use crate::config::{DatabaseConfig, PoolConfig, RetryPolicy, WorkflowConfig};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
}
