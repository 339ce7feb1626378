// ABOUTME: `reconcile` and `plan` subcommands - one full run against the target database
// ABOUTME: Resolves the target, loads configuration, wires Ctrl+C and prints the summary

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::fetch::HttpSource;
use crate::runner::{self, RunReport};
use crate::state;
use crate::store::PgStore;
use crate::utils::mask_password;

#[derive(Args, Clone, Debug, Default)]
pub struct ReconcileArgs {
    /// Target PostgreSQL URL (falls back to REFDATA_TARGET_URL, then `target set`)
    #[arg(long, env = "REFDATA_TARGET_URL")]
    pub target: Option<String>,
    /// TOML file describing the tables to reconcile (defaults to the built-in catalog)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Only reconcile these logical tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,
    /// Read and diff without writing; print the statements that would run
    #[arg(long)]
    pub dry_run: bool,
    /// Maximum identifiers per statement
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Print the run report as JSON instead of the text summary
    #[arg(long)]
    pub json: bool,
}

/// Pick the target URL: explicit flag or env, then the persisted state.
pub fn resolve_target(explicit: Option<String>) -> Result<String> {
    if let Some(url) = explicit.filter(|u| !u.trim().is_empty()) {
        return Ok(url);
    }
    let state = state::load().context("Failed to load state")?;
    match state.target_url {
        Some(url) => Ok(url),
        None => bail!(
            "No target database configured.\n\
             Pass --target, set REFDATA_TARGET_URL, or run `refdata-reconciler target set <url>`"
        ),
    }
}

/// Load the configuration and apply command-line overrides.
pub fn load_config(args: &ReconcileArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::builtin(),
    };
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    config.select_tables(&args.tables)?;
    config.validate()?;
    Ok(config)
}

pub async fn command(args: ReconcileArgs, allow_self_signed: bool) -> Result<()> {
    let config = load_config(&args)?;
    let target = resolve_target(args.target.clone())?;

    let names: Vec<&str> = config.tables.iter().map(|t| t.name.as_str()).collect();
    tracing::info!(
        "Reconciling {} into {}{}",
        names.join(", "),
        mask_password(&target),
        if args.dry_run { " (dry run)" } else { "" }
    );

    let store = PgStore::connect(&target, config.statement_timeout(), allow_self_signed).await?;
    let source = HttpSource::from_config(&config)?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current batch");
            let _ = ctrl_c_tx.send(());
        }
    });

    let report = match runner::run(&config, &source, &store, args.dry_run, &shutdown_tx).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Reconciliation failed: {}", e);
            return Err(e.into());
        }
    };

    print_report(&report, args.json)
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if report.dry_run {
        for table in &report.tables {
            if table.previews.is_empty() {
                continue;
            }
            println!();
            println!("-- {}", table.table);
            for preview in &table.previews {
                println!("{};", preview);
            }
        }
    }

    println!();
    println!("========================================");
    println!("Reconciliation summary");
    println!("========================================");
    for line in report.summary() {
        println!("{}", line);
    }
    Ok(())
}
