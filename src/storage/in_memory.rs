//! In-memory implementation of OrderStore for testing and development
//!
//! Writes made through a transaction are buffered on the handle and only
//! applied to the shared state on commit, so rolled back or dropped
//! transactions leave nothing behind. Order numbers are unique and order
//! lines must reference an order the transaction can see, mirroring the
//! MySQL schema's UNIQUE and FOREIGN KEY constraints.
//!
//! Faults can be queued per write step to exercise failure paths.

use crate::core::error::{StoreError, StoreErrorKind};
use crate::core::order::{
    Order, OrderId, OrderItem, OrderItemRow, OrderNumber, OrderRow, OrderSnapshot, OrderStatus,
};
use crate::core::store::{
    CleanupReport, IsolationLevel, OrderStore, OrderTransaction, TransactionOptions,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

const BACKEND: &str = "memory";

/// Point in the workflow where a fault can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStep {
    Begin,
    InsertOrder,
    InsertOrderItem,
    UpdateAssignment,
    Commit,
    Cleanup,
}

#[derive(Debug, Clone, Copy)]
enum FaultAction {
    Fail(StoreErrorKind),
    Delay(Duration),
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    step: WriteStep,
    action: FaultAction,
}

/// Counters over the store's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

#[derive(Debug, Default)]
struct State {
    orders: BTreeMap<OrderId, Order>,
    items: BTreeMap<u64, OrderItem>,
    next_order_id: u64,
    next_item_id: u64,
    faults: VecDeque<Fault>,
    stats: TransactionStats,
    last_isolation_level: Option<IsolationLevel>,
    closed: bool,
}

impl State {
    fn order_id_by_number(&self, order_number: &OrderNumber) -> Option<OrderId> {
        self.orders
            .values()
            .find(|o| &o.order_number == order_number)
            .map(|o| o.id)
    }
}

fn lock_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::new(
        BACKEND,
        StoreErrorKind::Other,
        format!("Failed to acquire lock: {}", e),
    )
}

fn closed_error() -> StoreError {
    StoreError::connectivity(BACKEND, "Pool is closed")
}

fn read(state: &RwLock<State>) -> Result<RwLockReadGuard<'_, State>, StoreError> {
    state.read().map_err(lock_error)
}

fn write(state: &RwLock<State>) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
    state.write().map_err(lock_error)
}

/// Pop the first queued fault for `step` and apply it
async fn trip(state: &RwLock<State>, step: WriteStep) -> Result<(), StoreError> {
    let action = {
        let mut guard = write(state)?;
        match guard.faults.iter().position(|f| f.step == step) {
            Some(index) => guard.faults.remove(index).map(|f| f.action),
            None => None,
        }
    };

    match action {
        Some(FaultAction::Fail(kind)) => Err(StoreError::new(
            BACKEND,
            kind,
            format!("Injected {} at {:?}", kind, step),
        )),
        Some(FaultAction::Delay(duration)) => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// InMemoryOrderStore
// ---------------------------------------------------------------------------

/// In-memory order store
///
/// Cloning shares the underlying state, like cloning a connection pool.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `step` fail with `kind`
    pub fn fail_next(&self, step: WriteStep, kind: StoreErrorKind) {
        self.push_fault(step, FaultAction::Fail(kind));
    }

    /// Make the next `step` stall for `duration` before proceeding
    pub fn delay_next(&self, step: WriteStep, duration: Duration) {
        self.push_fault(step, FaultAction::Delay(duration));
    }

    fn push_fault(&self, step: WriteStep, action: FaultAction) {
        if let Ok(mut state) = self.state.write() {
            state.faults.push_back(Fault { step, action });
        }
    }

    pub fn order_count(&self) -> usize {
        self.state.read().map(|s| s.orders.len()).unwrap_or(0)
    }

    pub fn item_count(&self) -> usize {
        self.state.read().map(|s| s.items.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> TransactionStats {
        self.state.read().map(|s| s.stats).unwrap_or_default()
    }

    /// Isolation level requested by the most recent `begin`
    pub fn last_isolation_level(&self) -> Option<IsolationLevel> {
        self.state.read().ok().and_then(|s| s.last_isolation_level)
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().map(|s| s.closed).unwrap_or(true)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    type Transaction = InMemoryTransaction;

    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if read(&self.state)?.closed {
            return Err(closed_error());
        }
        Ok(())
    }

    async fn begin(&self, options: &TransactionOptions) -> Result<InMemoryTransaction, StoreError> {
        trip(&self.state, WriteStep::Begin).await?;

        let mut state = write(&self.state)?;
        if state.closed {
            return Err(closed_error());
        }
        state.stats.begun += 1;
        state.last_isolation_level = Some(options.isolation_level);

        Ok(InMemoryTransaction {
            state: Arc::clone(&self.state),
            orders: BTreeMap::new(),
            items: Vec::new(),
            assignments: Vec::new(),
        })
    }

    async fn find_order_by_number(
        &self,
        order_number: &OrderNumber,
    ) -> Result<Option<OrderSnapshot>, StoreError> {
        let state = read(&self.state)?;
        if state.closed {
            return Err(closed_error());
        }

        let Some(order_id) = state.order_id_by_number(order_number) else {
            return Ok(None);
        };
        let Some(order) = state.orders.get(&order_id).cloned() else {
            return Ok(None);
        };
        let items = state
            .items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect();

        Ok(Some(OrderSnapshot { order, items }))
    }

    async fn delete_order_by_number(
        &self,
        order_number: &OrderNumber,
    ) -> Result<CleanupReport, StoreError> {
        trip(&self.state, WriteStep::Cleanup).await?;

        let mut state = write(&self.state)?;
        if state.closed {
            return Err(closed_error());
        }

        let Some(order_id) = state.order_id_by_number(order_number) else {
            return Ok(CleanupReport::default());
        };

        let before = state.items.len();
        state.items.retain(|_, item| item.order_id != order_id);
        let items_deleted = (before - state.items.len()) as u64;
        let orders_deleted = u64::from(state.orders.remove(&order_id).is_some());

        Ok(CleanupReport {
            orders_deleted,
            items_deleted,
        })
    }

    async fn close(&self) {
        if let Ok(mut state) = self.state.write() {
            state.closed = true;
        }
    }
}

// ---------------------------------------------------------------------------
// InMemoryTransaction
// ---------------------------------------------------------------------------

/// Buffered transaction over an [`InMemoryOrderStore`]
pub struct InMemoryTransaction {
    state: Arc<RwLock<State>>,
    orders: BTreeMap<OrderId, Order>,
    items: Vec<OrderItem>,
    assignments: Vec<(OrderId, u64, OrderStatus, DateTime<Utc>)>,
}

impl InMemoryTransaction {
    fn unique_violation(order_number: &OrderNumber) -> StoreError {
        StoreError::new(
            BACKEND,
            StoreErrorKind::UniqueViolation,
            format!("Duplicate entry '{}' for key 'order_number'", order_number),
        )
    }
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn insert_order(&mut self, row: &OrderRow) -> Result<OrderId, StoreError> {
        trip(&self.state, WriteStep::InsertOrder).await?;

        let mut state = write(&self.state)?;
        let taken = state.order_id_by_number(&row.order_number).is_some()
            || self
                .orders
                .values()
                .any(|o| o.order_number == row.order_number);
        if taken {
            return Err(Self::unique_violation(&row.order_number));
        }

        // Ids are consumed even if the transaction later rolls back
        state.next_order_id += 1;
        let id = OrderId(state.next_order_id);
        self.orders.insert(id, Order::from_row(id, row.clone()));

        Ok(id)
    }

    async fn insert_order_item(&mut self, row: &OrderItemRow) -> Result<(), StoreError> {
        trip(&self.state, WriteStep::InsertOrderItem).await?;

        let mut state = write(&self.state)?;
        let visible =
            self.orders.contains_key(&row.order_id) || state.orders.contains_key(&row.order_id);
        if !visible {
            return Err(StoreError::new(
                BACKEND,
                StoreErrorKind::ForeignKeyViolation,
                format!("Order {} does not exist", row.order_id),
            ));
        }

        state.next_item_id += 1;
        self.items.push(OrderItem {
            id: state.next_item_id,
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name.clone(),
            quantity: row.quantity,
            unit_price: row.unit_price,
            total_price: row.total_price,
        });

        Ok(())
    }

    async fn update_assignment(
        &mut self,
        order_id: OrderId,
        distributor_id: u64,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        trip(&self.state, WriteStep::UpdateAssignment).await?;

        if let Some(order) = self.orders.get_mut(&order_id) {
            order.distributor_id = Some(distributor_id);
            order.status = status;
            order.updated_at = updated_at;
            return Ok(());
        }

        if !read(&self.state)?.orders.contains_key(&order_id) {
            return Err(StoreError::new(
                BACKEND,
                StoreErrorKind::NotFound,
                format!("Order {} not found", order_id),
            ));
        }
        self.assignments
            .push((order_id, distributor_id, status, updated_at));

        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        trip(&self.state, WriteStep::Commit).await?;

        let mut state = write(&self.state)?;
        if state.closed {
            return Err(closed_error());
        }

        // Another transaction may have committed the same number meanwhile
        if let Some(dup) = self
            .orders
            .values()
            .find(|o| state.order_id_by_number(&o.order_number).is_some())
        {
            state.stats.rolled_back += 1;
            return Err(Self::unique_violation(&dup.order_number));
        }

        // An assigned order may have been deleted since the update was buffered
        if let Some((order_id, ..)) = self
            .assignments
            .iter()
            .find(|(order_id, ..)| !state.orders.contains_key(order_id))
        {
            state.stats.rolled_back += 1;
            return Err(StoreError::new(
                BACKEND,
                StoreErrorKind::NotFound,
                format!("Order {} not found", order_id),
            ));
        }

        for (id, order) in self.orders {
            state.orders.insert(id, order);
        }
        for item in self.items {
            state.items.insert(item.id, item);
        }
        for (order_id, distributor_id, status, updated_at) in self.assignments {
            if let Some(order) = state.orders.get_mut(&order_id) {
                order.distributor_id = Some(distributor_id);
                order.status = status;
                order.updated_at = updated_at;
            }
        }
        state.stats.committed += 1;

        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        let mut state = write(&self.state)?;
        state.stats.rolled_back += 1;
        Ok(())
    }
}
