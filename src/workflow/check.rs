//! One diagnostic run from loaded configuration to process exit code
//!
//! This is the body of `order-creation-check` with the backend left open, so
//! the same exit-code rules hold for any [`OrderStore`].

use super::{OrderCreationWorkflow, OrderScenario, RunReport};
use crate::config::{DatabaseConfig, WorkflowConfig};
use crate::core::error::{ConfigError, WorkflowError};
use crate::core::store::OrderStore;
use std::future::Future;

/// How a diagnostic run ended
#[derive(Debug)]
pub enum CheckOutcome {
    /// The order committed
    Passed(RunReport),
    /// The workflow ran and did not commit
    Failed(WorkflowError),
    /// Configuration, scenario or connection failed before the workflow ran
    Aborted(anyhow::Error),
}

impl CheckOutcome {
    /// 0 when the order committed, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        match self {
            CheckOutcome::Passed(_) => 0,
            CheckOutcome::Failed(_) | CheckOutcome::Aborted(_) => 1,
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            CheckOutcome::Passed(report) => Some(report),
            CheckOutcome::Failed(e) => e.report(),
            CheckOutcome::Aborted(_) => None,
        }
    }
}

/// Connect with `connect`, run the scenario's order once and close the store
///
/// `connect` is only called once configuration and scenario both loaded.
pub async fn run_check<S, C, Fut>(
    config: Result<WorkflowConfig, ConfigError>,
    scenario: Result<OrderScenario, ConfigError>,
    keep_rows: bool,
    connect: C,
) -> CheckOutcome
where
    S: OrderStore,
    C: FnOnce(DatabaseConfig) -> Fut,
    Fut: Future<Output = anyhow::Result<S>>,
{
    let (config, scenario) = match (config, scenario) {
        (Ok(config), Ok(scenario)) => (config, scenario),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(code = e.error_code(), error = %e, "Order creation check aborted");
            return CheckOutcome::Aborted(e.into());
        }
    };
    tracing::info!(database = ?config.database, "Configuration loaded");

    let store = match connect(config.database.clone()).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = ?e, "Order creation check aborted");
            return CheckOutcome::Aborted(e);
        }
    };

    let workflow = OrderCreationWorkflow::from_scenario(&scenario, &config).keep_rows(keep_rows);
    match workflow.execute(&store).await {
        Ok(report) => {
            tracing::info!(
                order_number = %report.order_number,
                order_id = ?report.order_id,
                "Order creation check passed"
            );
            CheckOutcome::Passed(report)
        }
        Err(e) => {
            tracing::error!(code = e.error_code(), error = %e, "Order creation check failed");
            CheckOutcome::Failed(e)
        }
    }
}
