//! Offline ledger jobs
//!
//! Reconstructs missing ledger entries for historical receiving events and
//! runs the external sales sync outside the HTTP server. Ctrl-C stops a run
//! between items.

use std::process;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use shared::{BackfillMode, DateRange};
use stock_ledger::{
    config::Config,
    connect_database,
    external::SalesAnalyticsClient,
    init_tracing,
    services::{
        sales_sync::SyncSalesInput, BackfillJob, BackfillService, CancellationFlag,
        SalesSyncService,
    },
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ledger-backfill")]
#[command(about = "Backfill and sync jobs for the inventory ledger")]
#[command(version)]
struct Cli {
    /// Database connection URL (overrides configuration)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Post receive entries for receiving events missing from the ledger
    Receiving {
        #[command(flatten)]
        window: Window,

        #[arg(long, value_enum, default_value = "dry-run")]
        mode: Mode,
    },

    /// Post balancing transfers on internal source departments
    Transfers {
        #[command(flatten)]
        window: Window,

        #[arg(long, value_enum, default_value = "dry-run")]
        mode: Mode,
    },

    /// Pull sales from the analytics source and post recipe deductions
    SyncSales {
        #[command(flatten)]
        window: Window,

        /// Restrict to one branch
        #[arg(long)]
        branch: Option<Uuid>,
    },
}

#[derive(clap::Args)]
struct Window {
    /// First day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    start: NaiveDate,

    /// Last day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end: NaiveDate,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    DryRun,
    Execute,
}

impl From<Mode> for BackfillMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::DryRun => BackfillMode::DryRun,
            Mode::Execute => BackfillMode::Execute,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };
    if let Some(url) = cli.database_url.clone() {
        config.database.url = url;
    }

    let filter = if cli.verbose {
        "stock_ledger=debug,ledger_backfill=debug,sqlx=warn"
    } else {
        "stock_ledger=info,ledger_backfill=info,sqlx=warn"
    };
    init_tracing(filter, config.log_json);

    match run(cli.command, config).await {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Run one command and print its summary. Returns whether it finished cleanly.
async fn run(command: Commands, config: Config) -> anyhow::Result<bool> {
    let db = connect_database(&config.database).await?;

    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current item");
            on_signal.cancel();
        }
    });

    match command {
        Commands::Receiving { window, mode } => {
            run_backfill(db, BackfillJob::Receiving, window, mode, &cancel).await
        }
        Commands::Transfers { window, mode } => {
            run_backfill(db, BackfillJob::Transfers, window, mode, &cancel).await
        }
        Commands::SyncSales { window, branch } => {
            let source = SalesAnalyticsClient::new(&config.analytics)?;
            let report = SalesSyncService::new(db)
                .sync_sales(
                    &source,
                    &config.retry,
                    SyncSalesInput {
                        start_date: window.start,
                        end_date: window.end,
                        branch_id: branch,
                    },
                    &cancel,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(report.failed_lines.is_empty() && !report.cancelled)
        }
    }
}

async fn run_backfill(
    db: sqlx::PgPool,
    job: BackfillJob,
    window: Window,
    mode: Mode,
    cancel: &CancellationFlag,
) -> anyhow::Result<bool> {
    if window.end < window.start {
        anyhow::bail!("--end {} is before --start {}", window.end, window.start);
    }
    let range = DateRange::new(window.start, window.end);

    let summary = BackfillService::new(db)
        .run(job, range, mode.into(), cancel)
        .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(!summary.has_errors() && !summary.cancelled)
}
