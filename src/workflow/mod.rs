//! Transactional order creation
//!
//! [`OrderCreationWorkflow`] creates one order, its lines and its distributor
//! assignment inside a single transaction, then reports how that transaction
//! ended. Either every write commits or none does.
//!
//! ```text
//! check input ─► ping ─► begin ─► order ─► items ─► assignment ─► commit
//!                          ▲                                        │
//!                          └──── retry on lock contention ◄── rollback
//!                                                                   │
//!                                           cleanup by order number ◄┘
//! ```

pub mod check;
pub mod outcome;
pub mod scenario;
pub mod writers;

pub use check::{run_check, CheckOutcome};
pub use outcome::{AttemptRecord, CleanupOutcome, OutcomeHandler, OutcomeSignal, TransactionState};
pub use scenario::{OrderScenario, ScenarioItem};
pub use writers::{assign_distributor, create_order, create_order_item, order_totals, OrderTotals};

use crate::config::{RetryPolicy, WorkflowConfig};
use crate::core::error::{StoreError, WorkflowError};
use crate::core::money::ExchangeRate;
use crate::core::order::{NewOrder, OrderId, OrderNumber, OrderSnapshot, OrderStatus};
use crate::core::store::{OrderStore, OrderTransaction, TransactionOptions};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

/// Everything a run recorded, on success and on failure
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Correlates the report with the run's log lines
    pub run_id: Uuid,
    pub order_number: OrderNumber,
    /// Id of the committed order
    pub order_id: Option<OrderId>,
    pub state: TransactionState,
    pub attempts: Vec<AttemptRecord>,
    pub signals: Vec<OutcomeSignal>,
    /// The order as read back after commit, before cleanup
    pub snapshot: Option<OrderSnapshot>,
    pub cleanup: CleanupOutcome,
}

impl RunReport {
    pub fn committed(&self) -> bool {
        self.state == TransactionState::Committed
    }

    pub fn has_signal(&self, signal: OutcomeSignal) -> bool {
        self.signals.contains(&signal)
    }
}

/// Create an order with its items and assignment in one transaction
#[derive(Debug, Clone)]
pub struct OrderCreationWorkflow {
    order: NewOrder,
    rate: ExchangeRate,
    distributor_id: u64,
    assigned_status: OrderStatus,
    options: TransactionOptions,
    retry: RetryPolicy,
    keep_rows: bool,
}

impl OrderCreationWorkflow {
    pub fn new(order: NewOrder, rate: ExchangeRate, distributor_id: u64) -> Self {
        Self {
            order,
            rate,
            distributor_id,
            assigned_status: OrderStatus::Confirmed,
            options: TransactionOptions::default(),
            retry: RetryPolicy::default(),
            keep_rows: false,
        }
    }

    /// Build a workflow for `scenario` with a freshly generated order number
    pub fn from_scenario(scenario: &OrderScenario, config: &WorkflowConfig) -> Self {
        let order_number = OrderNumber::generate(&config.order_number_prefix);
        Self::new(
            scenario.to_new_order(order_number),
            scenario.exchange_rate(),
            scenario.distributor_id,
        )
        .with_assigned_status(scenario.assigned_status)
        .with_transaction_options(config.transaction.options)
        .with_retry(config.retry)
    }

    pub fn with_assigned_status(mut self, status: OrderStatus) -> Self {
        self.assigned_status = status;
        self
    }

    pub fn with_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Leave the committed rows in place instead of cleaning them up
    pub fn keep_rows(mut self, keep: bool) -> Self {
        self.keep_rows = keep;
        self
    }

    pub fn order(&self) -> &NewOrder {
        &self.order
    }

    pub fn order_number(&self) -> &OrderNumber {
        &self.order.order_number
    }

    /// Run the workflow and close the store, whatever the outcome
    pub async fn execute<S: OrderStore>(&self, store: &S) -> Result<RunReport, WorkflowError> {
        let result = self.run(store).await;
        store.close().await;
        tracing::info!(backend = store.backend(), "Connection pool closed");
        result
    }

    /// Run the workflow, leaving the store open
    #[tracing::instrument(
        name = "order_creation",
        skip_all,
        fields(
            order_number = %self.order.order_number,
            backend = store.backend(),
            run_id = tracing::field::Empty
        )
    )]
    pub async fn run<S: OrderStore>(&self, store: &S) -> Result<RunReport, WorkflowError> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        self.order.check(&self.rate)?;

        store.ping().await.map_err(|e| {
            tracing::error!(error = %e, "Store unreachable");
            WorkflowError::Connectivity(e)
        })?;

        let mut handler = OutcomeHandler::new(self.order.order_number.clone());
        let max_attempts = self.retry.max_attempts.max(1);
        let mut order_id = None;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_before(attempt);
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Retrying order creation");
                tokio::time::sleep(delay).await;
            }

            match self.attempt(store, &mut handler, attempt).await {
                Ok(id) => {
                    order_id = Some(id);
                    last_error = None;
                    break;
                }
                Err(e) => {
                    let retry = e.is_retryable() && attempt < max_attempts;
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                }
            }
        }

        let snapshot = match order_id {
            Some(_) => self.read_back(store).await,
            None => None,
        };
        let cleanup = handler.cleanup(store, self.keep_rows).await;
        let (state, attempts, signals) = handler.finish();

        let report = RunReport {
            run_id,
            order_number: self.order.order_number.clone(),
            order_id,
            state,
            attempts,
            signals,
            snapshot,
            cleanup,
        };

        match last_error {
            None => {
                tracing::info!(order_id = ?report.order_id, "Order creation committed");
                Ok(report)
            }
            Some(source) => Err(WorkflowError::Transaction {
                source,
                report: Box::new(report),
            }),
        }
    }

    /// One pass through begin, writes and the terminal step
    async fn attempt<S: OrderStore>(
        &self,
        store: &S,
        handler: &mut OutcomeHandler,
        attempt: u32,
    ) -> Result<OrderId, StoreError> {
        let mut tx = match store.begin(&self.options).await {
            Ok(tx) => tx,
            Err(e) => {
                handler.begin_failed(attempt, &e);
                return Err(e);
            }
        };
        handler.opened(attempt);

        // The budget covers the writes and the commit
        let deadline = Instant::now() + self.options.timeout;
        let over_budget = || {
            StoreError::timeout(
                store.backend(),
                format!(
                    "Transaction exceeded its {} ms budget",
                    self.options.timeout.as_millis()
                ),
            )
        };

        let result = match tokio::time::timeout_at(deadline, self.write_all(&mut tx)).await {
            Ok(result) => result,
            Err(_) => Err(over_budget()),
        };

        match result {
            Ok(order_id) => {
                handler.commit(tx, attempt, deadline, over_budget).await?;
                Ok(order_id)
            }
            Err(e) => {
                handler.roll_back(tx, attempt, &e).await;
                Err(e)
            }
        }
    }

    async fn write_all<T: OrderTransaction>(&self, tx: &mut T) -> Result<OrderId, StoreError> {
        let order_id = create_order(tx, &self.order, &self.rate).await?;
        tracing::info!(%order_id, "Order created");

        // One at a time over the transaction's connection
        for item in &self.order.items {
            create_order_item(tx, order_id, item, &self.rate).await?;
            tracing::debug!(%order_id, product_id = item.product_id, "Order item created");
        }
        tracing::info!(%order_id, items = self.order.items.len(), "Order items created");

        assign_distributor(tx, order_id, self.distributor_id, self.assigned_status).await?;
        tracing::info!(
            %order_id,
            distributor_id = self.distributor_id,
            status = %self.assigned_status,
            "Distributor assigned"
        );

        Ok(order_id)
    }

    /// Best-effort read of the committed order for the report
    async fn read_back<S: OrderStore>(&self, store: &S) -> Option<OrderSnapshot> {
        match store.find_order_by_number(&self.order.order_number).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read back committed order");
                None
            }
        }
    }
}
