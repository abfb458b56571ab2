//! Core module containing the order model, money, errors and store traits

pub mod error;
pub mod money;
pub mod order;
pub mod store;

pub use error::{ConfigError, StoreError, StoreErrorKind, ValidationError, WorkflowError};
pub use money::{ExchangeRate, MoneyPair};
pub use order::{
    NewOrder, NewOrderItem, Order, OrderId, OrderItem, OrderNumber, OrderSnapshot, OrderStatus,
    PaymentStatus,
};
pub use store::{CleanupReport, IsolationLevel, OrderStore, OrderTransaction, TransactionOptions};
