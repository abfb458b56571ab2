//! `order-creation-check`: create one order against MySQL inside a single
//! transaction, report the outcome and clean up.
//!
//! Exit code 0 when the transaction committed, 1 otherwise.

use anyhow::Context;
use bakery_orders::prelude::*;
use bakery_orders::storage::mysql::ensure_schema;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "order-creation-check")]
#[command(about = "Create an order with items and a distributor assignment in one transaction")]
struct Cli {
    /// YAML scenario describing the order; the built-in bakery order otherwise
    #[arg(long, value_name = "FILE")]
    scenario: Option<PathBuf>,

    /// Leave the committed rows in the database
    #[arg(long)]
    keep_rows: bool,

    /// Create the orders tables if they do not exist
    #[arg(long)]
    ensure_schema: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    report: bool,
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

fn print_report(report: &RunReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let scenario = match &cli.scenario {
        Some(path) => OrderScenario::from_yaml_file(path),
        None => Ok(OrderScenario::bakery_default()),
    };
    let ensure = cli.ensure_schema;

    let outcome = run_check(
        WorkflowConfig::from_env(),
        scenario,
        cli.keep_rows,
        |database| async move {
            let store = MysqlOrderStore::connect(&database).await?;
            if ensure {
                if let Err(e) = ensure_schema(store.pool()).await {
                    store.close().await;
                    return Err(e.into());
                }
            }
            Ok::<_, anyhow::Error>(store)
        },
    )
    .await;

    if let (true, Some(report)) = (cli.report, outcome.report()) {
        if let Err(e) = print_report(report) {
            tracing::error!(error = ?e, "Failed to print run report");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::from(outcome.exit_code())
}
