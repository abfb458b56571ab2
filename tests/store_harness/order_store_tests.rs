//! Macro-generated test suite for the `OrderStore` contract.
//!
//! The `order_store_tests!` macro generates a test module that validates any
//! `OrderStore` implementation: atomic commit, rollback, visibility, integrity
//! errors, cleanup and the full workflow.
//!
//! Every test uses its own order number, so suites may share one database.
//!
//! # Generated Tests
//!
//! ## Transactions
//! - `test_commit_persists_everything`: order, lines and assignment after commit
//! - `test_rollback_leaves_no_rows`: nothing survives a rollback
//! - `test_uncommitted_writes_are_invisible`: reads outside the transaction see nothing
//!
//! ## Integrity
//! - `test_duplicate_order_number`: second insert of a committed number
//! - `test_item_for_missing_order`: line pointing at no order
//! - `test_assign_missing_order`: assignment of an unknown id
//!
//! ## Cleanup and lifecycle
//! - `test_cleanup_removes_order_and_items`
//! - `test_cleanup_of_missing_order_is_noop`
//! - `test_workflow_commits_and_cleans_up`
//! - `test_closed_store_is_unreachable`

/// Generate the `OrderStore` conformance suite.
///
/// `$factory` must evaluate to a fresh `OrderStore`. It is re-evaluated for
/// each test.
#[allow(unused_macros)]
macro_rules! order_store_tests {
    ($factory:expr) => {
        mod order_store_contract_tests {
            use super::*;
            use bakery_orders::core::error::StoreErrorKind;
            use bakery_orders::core::order::{NewOrderItem, OrderId, OrderStatus};
            use bakery_orders::core::store::{OrderStore, OrderTransaction, TransactionOptions};
            use bakery_orders::workflow::{
                CleanupOutcome, OrderCreationWorkflow, OutcomeSignal, create_order,
                create_order_item,
            };
            use rust_decimal_macros::dec;

            // ==================================================================
            // Transactions
            // ==================================================================

            #[tokio::test]
            async fn test_commit_persists_everything() {
                let store = $factory;
                let order = bakery_order(fresh_number("commit"));

                let mut tx = store.begin(&TransactionOptions::default()).await.unwrap();
                let order_id = write_order(&mut tx, &order).await;
                tx.commit().await.unwrap();

                let snapshot = store
                    .find_order_by_number(&order.order_number)
                    .await
                    .unwrap()
                    .expect("Order should exist after commit");
                assert_eq!(snapshot.order.id, order_id);
                assert_eq!(snapshot.order.store_id, 1);
                assert_eq!(snapshot.order.created_by_name.as_deref(), Some("Admin"));
                assert_bakery_snapshot(&snapshot);

                store.delete_order_by_number(&order.order_number).await.unwrap();
            }

            #[tokio::test]
            async fn test_rollback_leaves_no_rows() {
                let store = $factory;
                let order = bakery_order(fresh_number("rollback"));

                let mut tx = store.begin(&TransactionOptions::default()).await.unwrap();
                write_order(&mut tx, &order).await;
                tx.rollback().await.unwrap();

                let found = store.find_order_by_number(&order.order_number).await.unwrap();
                assert!(found.is_none(), "Rolled back order must not be visible");
            }

            #[tokio::test]
            async fn test_uncommitted_writes_are_invisible() {
                let store = $factory;
                let order = bakery_order(fresh_number("invisible"));

                let mut tx = store.begin(&TransactionOptions::default()).await.unwrap();
                write_order(&mut tx, &order).await;

                let found = store.find_order_by_number(&order.order_number).await.unwrap();
                assert!(found.is_none(), "Uncommitted order leaked outside its transaction");

                tx.rollback().await.unwrap();
            }

            // ==================================================================
            // Integrity
            // ==================================================================

            #[tokio::test]
            async fn test_duplicate_order_number() {
                let store = $factory;
                let order = bakery_order(fresh_number("duplicate"));

                let mut tx = store.begin(&TransactionOptions::default()).await.unwrap();
                write_order(&mut tx, &order).await;
                tx.commit().await.unwrap();

                let mut tx = store.begin(&TransactionOptions::default()).await.unwrap();
                let err = create_order(&mut tx, &order, &rate()).await.unwrap_err();
                assert_eq!(err.kind, StoreErrorKind::UniqueViolation);
                assert_eq!(err.error_code(), "DUPLICATE_KEY");
                tx.rollback().await.unwrap();

                // The committed order is untouched
                let snapshot = store
                    .find_order_by_number(&order.order_number)
                    .await
                    .unwrap()
                    .unwrap();
                assert_bakery_snapshot(&snapshot);

                store.delete_order_by_number(&order.order_number).await.unwrap();
            }

            #[tokio::test]
            async fn test_item_for_missing_order() {
                let store = $factory;
                let item = NewOrderItem {
                    product_id: 1,
                    product_name: "Bread".to_string(),
                    quantity: 1,
                    unit_price: dec!(1.00),
                    unit_cost: None,
                };

                let mut tx = store.begin(&TransactionOptions::default()).await.unwrap();
                let err = create_order_item(&mut tx, OrderId(999_999_999), &item, &rate())
                    .await
                    .unwrap_err();
                assert_eq!(err.kind, StoreErrorKind::ForeignKeyViolation);
                assert!(err.kind.is_constraint_violation());
                tx.rollback().await.unwrap();
            }

            #[tokio::test]
            async fn test_assign_missing_order() {
                let store = $factory;

                let mut tx = store.begin(&TransactionOptions::default()).await.unwrap();
                let err = tx
                    .update_assignment(
                        OrderId(999_999_999),
                        DISTRIBUTOR_ID,
                        OrderStatus::Confirmed,
                        chrono::Utc::now(),
                    )
                    .await
                    .unwrap_err();
                assert_eq!(err.kind, StoreErrorKind::NotFound);
                tx.rollback().await.unwrap();
            }

            // ==================================================================
            // Cleanup and lifecycle
            // ==================================================================

            #[tokio::test]
            async fn test_cleanup_removes_order_and_items() {
                let store = $factory;
                let order = bakery_order(fresh_number("cleanup"));

                let mut tx = store.begin(&TransactionOptions::default()).await.unwrap();
                write_order(&mut tx, &order).await;
                tx.commit().await.unwrap();

                let report = store.delete_order_by_number(&order.order_number).await.unwrap();
                assert_eq!(report.orders_deleted, 1);
                assert_eq!(report.items_deleted, 2);

                let found = store.find_order_by_number(&order.order_number).await.unwrap();
                assert!(found.is_none());
            }

            #[tokio::test]
            async fn test_cleanup_of_missing_order_is_noop() {
                let store = $factory;
                let report = store
                    .delete_order_by_number(&fresh_number("absent"))
                    .await
                    .unwrap();
                assert!(report.is_noop());
            }

            #[tokio::test]
            async fn test_workflow_commits_and_cleans_up() {
                let store = $factory;
                let order = bakery_order(fresh_number("workflow"));
                let number = order.order_number.clone();

                let report = OrderCreationWorkflow::new(order, rate(), DISTRIBUTOR_ID)
                    .run(&store)
                    .await
                    .unwrap();

                assert!(report.committed());
                assert_eq!(report.signals, vec![OutcomeSignal::Committed]);
                assert_eq!(report.attempts.len(), 1);
                let snapshot = report.snapshot.as_ref().expect("Committed order not read back");
                assert_bakery_snapshot(snapshot);
                assert!(matches!(
                    report.cleanup,
                    CleanupOutcome::Deleted(r) if r.orders_deleted == 1 && r.items_deleted == 2
                ));

                assert!(store.find_order_by_number(&number).await.unwrap().is_none());
            }

            #[tokio::test]
            async fn test_closed_store_is_unreachable() {
                let store = $factory;
                store.close().await;

                let err = store.ping().await.unwrap_err();
                assert_eq!(err.kind, StoreErrorKind::Connectivity);
                assert!(store.begin(&TransactionOptions::default()).await.is_err());
            }
        }
    };
}
