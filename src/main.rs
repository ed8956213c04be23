//! filsync: incrementally mirror the transfer history of watched Filecoin
//! accounts from a block explorer into a local SQLite ledger.
//!
//! Each pass asks the explorer how many transfers an account has, compares
//! that with what is stored locally, and pages in only the difference. The
//! ledger then answers per-type totals (rewards, sends, burns) by account and
//! by day.

#![warn(clippy::all)]

mod amount;
mod cli;
mod config;
mod feed;
mod shutdown;
mod state;
mod sync;
mod types;

use std::sync::Arc;

use chrono::NaiveDate;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use feed::ExplorerClient;
use state::{CheckpointStore, LedgerStore, Role, SqliteStateDb, SyncMode};
use sync::SyncEngine;

/// Print per-account counts, progress, and totals per transfer type.
async fn run_status(
    db: &SqliteStateDb,
    accounts: &[String],
    date: Option<NaiveDate>,
) -> anyhow::Result<()> {
    println!("Ledger: {}", db.path().display());

    for account in accounts {
        let count = db.count_for_account(account).await?;
        let checkpoint = db.get_checkpoint(account).await?;

        println!();
        println!("{}", account);
        println!("  Stored transfers: {}", count);
        match checkpoint {
            Some(c) => println!("  Checkpoint:       {}", c),
            None => println!("  Checkpoint:       (never synced)"),
        }

        if let Some(run) = db.last_sync_run(account).await? {
            let finished = match run.completed_at {
                Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                None => format!(
                    "started {}, did not finish",
                    run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
            };
            println!(
                "  Last {} sync:     {} ({} fetched, {} new{})",
                run.mode.as_str(),
                finished,
                run.stats.fetched,
                run.stats.inserted,
                if run.stats.interrupted {
                    ", interrupted"
                } else {
                    ""
                }
            );
        }

        let kinds = db.kinds_for_account(account).await?;
        if kinds.is_empty() {
            continue;
        }

        let day = date.unwrap_or_else(state::today_utc);
        println!("  {:<12} {:>30} {:>30}", "type", "all time", day.to_string());
        for kind in &kinds {
            let role = Role::for_kind(kind);
            let total = db.sum_by_type_and_role(kind, account, role).await?;
            let on_day = db.sum_by_type_for_date(kind, account, role, day).await?;
            println!("  {:<12} {:>30} {:>30}", kind, total, on_day);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.effective_log_level().as_str())),
        )
        .init();

    let config = config::Config::from_cli(&cli)?;
    let command = cli.effective_command();

    let db = Arc::new(SqliteStateDb::open(&config.database).await?);
    tracing::debug!(path = %config.database.display(), "Ledger opened");

    let mode = match command {
        Command::Status { date } => return run_status(&db, &config.accounts, date).await,
        Command::Sync => SyncMode::Incremental,
        Command::FullSync => SyncMode::Full,
    };

    let client = ExplorerClient::new(&config.api_url, config.timeout)?;
    let engine = SyncEngine::new(Arc::new(client), db, config.page_size);
    tracing::info!(
        accounts = config.accounts.len(),
        mode = mode.as_str(),
        api_url = %config.api_url,
        "Starting filsync"
    );

    let shutdown_token = shutdown::install_signal_handler();

    loop {
        let report = engine
            .run_pass(&config.accounts, mode, &shutdown_token)
            .await;
        if report.failed() > 0 {
            tracing::warn!(
                failed = report.failed(),
                "Some accounts failed; they will be retried on the next pass"
            );
        }

        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }

        let Some(interval) = config.watch_with_interval else {
            break;
        };
        tracing::info!("Waiting {} seconds...", interval);
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
            _ = shutdown_token.cancelled() => {
                tracing::info!("Shutdown during wait, exiting...");
                break;
            }
        }
    }

    Ok(())
}
