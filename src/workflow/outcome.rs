//! Transaction outcome handling
//!
//! [`OutcomeHandler`] owns the terminal step of each attempt: it commits or
//! rolls back the handle it is given, classifies the failure, and records
//! the signals an operator needs to tell contention from data errors. It
//! also runs the best-effort cleanup once the attempts are over.

use crate::core::error::{StoreError, StoreErrorKind};
use crate::core::order::OrderNumber;
use crate::core::store::{CleanupReport, OrderStore, OrderTransaction};
use serde::Serialize;
use tokio::time::Instant;

/// Where an attempt's transaction ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// `begin` itself failed
    NotStarted,
    Open,
    Committed,
    RolledBack,
}

/// Distinct events emitted while deciding a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSignal {
    Committed,
    RolledBack,
    /// The rollback was caused by a lock wait timeout
    LockTimeout,
    /// The explicit rollback call itself failed
    RollbackFailed,
    CleanupFailed,
}

/// One attempt at the transactional block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub state: TransactionState,
    pub error: Option<StoreErrorKind>,
}

/// What the post-transaction cleanup did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum CleanupOutcome {
    /// Rows were kept on request
    Skipped,
    Deleted(CleanupReport),
    Failed { message: String },
}

/// Drives `Open → {Committed, RolledBack}` for each attempt
#[derive(Debug)]
pub struct OutcomeHandler {
    order_number: OrderNumber,
    state: TransactionState,
    attempts: Vec<AttemptRecord>,
    signals: Vec<OutcomeSignal>,
}

impl OutcomeHandler {
    pub fn new(order_number: OrderNumber) -> Self {
        Self {
            order_number,
            state: TransactionState::NotStarted,
            attempts: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn signals(&self) -> &[OutcomeSignal] {
        &self.signals
    }

    /// A transaction for `attempt` is open
    pub fn opened(&mut self, attempt: u32) {
        tracing::debug!(order_number = %self.order_number, attempt, "Transaction opened");
        self.state = TransactionState::Open;
    }

    /// `begin` failed for `attempt`; there is nothing to roll back
    pub fn begin_failed(&mut self, attempt: u32, error: &StoreError) {
        tracing::error!(
            order_number = %self.order_number,
            attempt,
            kind = %error.kind,
            error = %error,
            "Failed to begin transaction"
        );
        self.state = TransactionState::NotStarted;
        self.attempts.push(AttemptRecord {
            attempt,
            state: TransactionState::NotStarted,
            error: Some(error.kind),
        });
    }

    /// Commit `tx` before `deadline`; a failed or late commit counts as a
    /// rollback, reported with the error `expired` builds
    pub async fn commit<T: OrderTransaction>(
        &mut self,
        tx: T,
        attempt: u32,
        deadline: Instant,
        expired: impl FnOnce() -> StoreError,
    ) -> Result<(), StoreError> {
        debug_assert_eq!(self.state, TransactionState::Open);

        // A commit cut short drops the handle, and the store discards the
        // transaction with it
        let committed = match tokio::time::timeout_at(deadline, tx.commit()).await {
            Ok(result) => result,
            Err(_) => Err(expired()),
        };

        match committed {
            Ok(()) => {
                tracing::info!(order_number = %self.order_number, attempt, "Transaction committed");
                self.state = TransactionState::Committed;
                self.signals.push(OutcomeSignal::Committed);
                self.attempts.push(AttemptRecord {
                    attempt,
                    state: TransactionState::Committed,
                    error: None,
                });
                Ok(())
            }
            Err(error) => {
                // The store discards the transaction when COMMIT fails
                self.record_rollback(attempt, &error);
                Err(error)
            }
        }
    }

    /// Roll `tx` back because of `cause`
    pub async fn roll_back<T: OrderTransaction>(
        &mut self,
        tx: T,
        attempt: u32,
        cause: &StoreError,
    ) {
        debug_assert_eq!(self.state, TransactionState::Open);

        if let Err(e) = tx.rollback().await {
            tracing::error!(
                order_number = %self.order_number,
                attempt,
                error = %e,
                "Rollback failed, connection discarded"
            );
            self.signals.push(OutcomeSignal::RollbackFailed);
        }
        self.record_rollback(attempt, cause);
    }

    fn record_rollback(&mut self, attempt: u32, cause: &StoreError) {
        tracing::error!(
            order_number = %self.order_number,
            attempt,
            kind = %cause.kind,
            code = cause.error_code(),
            error = %cause,
            "Transaction rolled back"
        );
        self.signals.push(OutcomeSignal::RolledBack);

        if cause.is_lock_timeout() {
            tracing::warn!(
                order_number = %self.order_number,
                attempt,
                signal = "lock_timeout",
                "Lock wait timeout: another transaction held a conflicting lock"
            );
            self.signals.push(OutcomeSignal::LockTimeout);
        }

        self.state = TransactionState::RolledBack;
        self.attempts.push(AttemptRecord {
            attempt,
            state: TransactionState::RolledBack,
            error: Some(cause.kind),
        });
    }

    /// Delete the order's rows outside any transaction, whatever the outcome
    ///
    /// After a rollback there is normally nothing left, so this is a no-op.
    /// Failures are logged and recorded, never raised.
    pub async fn cleanup<S: OrderStore>(&mut self, store: &S, keep_rows: bool) -> CleanupOutcome {
        if keep_rows {
            tracing::info!(order_number = %self.order_number, "Keeping rows, cleanup skipped");
            return CleanupOutcome::Skipped;
        }

        match store.delete_order_by_number(&self.order_number).await {
            Ok(report) => {
                tracing::info!(
                    order_number = %self.order_number,
                    orders_deleted = report.orders_deleted,
                    items_deleted = report.items_deleted,
                    "Cleanup complete"
                );
                CleanupOutcome::Deleted(report)
            }
            Err(e) => {
                tracing::warn!(
                    order_number = %self.order_number,
                    error = %e,
                    "Cleanup failed"
                );
                self.signals.push(OutcomeSignal::CleanupFailed);
                CleanupOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Hand over the recorded attempts and signals
    pub fn finish(self) -> (TransactionState, Vec<AttemptRecord>, Vec<OutcomeSignal>) {
        (self.state, self.attempts, self.signals)
    }
}
