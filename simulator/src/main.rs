//! SimpleBank Simulator
//!
//! Seeds accounts and drives concurrent transfers through the transfer engine,
//! checking balances as it goes.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod accounts;
mod backend;
mod controller;
mod metrics;
mod scenario;

use backend::Backend;
use controller::SimulationController;
use metrics::SimulationReport;
use scenario::{Scenario, ScenarioParams};
use simplebank_ledger::{LedgerConfig, MemoryDatabase, PgDatabase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// In-process datastore with fault injection.
    Memory,
    /// PostgreSQL at DATABASE_URL.
    Postgres,
}

/// SimpleBank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "SimpleBank transfer engine load and scenario driver")]
struct Args {
    /// Datastore to run against
    #[arg(long, value_enum, default_value = "memory")]
    backend: BackendKind,

    /// Number of accounts to open
    #[arg(short, long, default_value = "4")]
    accounts: usize,

    /// Opening balance of every account, in minor units
    #[arg(long, default_value = "100000")]
    initial_balance: i64,

    /// Built-in scenario to run
    #[arg(short, long, default_value = "random-load", conflicts_with = "scenario_file")]
    scenario: String,

    /// JSON scenario file to run instead of a built-in one
    #[arg(long)]
    scenario_file: Option<PathBuf>,

    /// Transfers issued by load scenarios
    #[arg(short, long, default_value = "100")]
    transfers: usize,

    /// Maximum transfers in flight for random load
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Largest random transfer amount, in minor units
    #[arg(long, default_value = "1000")]
    max_amount: i64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = LedgerConfig::from_env().context("failed to load configuration")?;
    config.validate()?;
    init_tracing(&config.log_level, args.log_json);

    let scenario = match &args.scenario_file {
        Some(path) => Scenario::from_file(path)?,
        None => Scenario::builtin(
            &args.scenario,
            ScenarioParams {
                initial_balance: args.initial_balance,
                transfers: args.transfers,
                max_amount: args.max_amount,
            },
        )?,
    };

    info!(
        backend = ?args.backend,
        accounts = args.accounts,
        overdraft = %config.transfer.overdraft,
        "Starting SimpleBank Simulator"
    );

    let report = match args.backend {
        BackendKind::Memory => run(MemoryDatabase::new(), &config, &args, &scenario).await?,
        BackendKind::Postgres => {
            let db = PgDatabase::connect(&config.database)
                .await
                .context("failed to connect to database")?;
            run(db, &config, &args, &scenario).await?
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!("Simulation complete");
        info!("Total transfers: {}", report.total);
        info!("Succeeded: {}", report.succeeded);
        info!("Rejected: {}", report.rejected);
        info!("Failed: {}", report.failed);
        info!(
            "Latency p50/p99: {}us / {}us",
            report.p50_latency_us, report.p99_latency_us
        );
        info!("Throughput: {:.1} transfers/s", report.throughput_per_sec);
    }

    Ok(())
}

async fn run<B: Backend>(
    db: B,
    config: &LedgerConfig,
    args: &Args,
    scenario: &Scenario,
) -> anyhow::Result<SimulationReport> {
    let mut controller =
        SimulationController::new(db, config.transfer.clone(), args.seed, args.concurrency);
    let accounts = args.accounts.max(scenario.accounts_needed()?);
    controller.initialize(accounts, args.initial_balance).await?;
    controller.run_scenario(scenario).await
}
