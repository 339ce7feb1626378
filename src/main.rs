// ABOUTME: CLI entry point for refdata-reconciler
// ABOUTME: Parses commands, initialises logging and routes to handlers

use clap::{Parser, Subcommand};
use refdata_reconciler::commands::{self, ReconcileArgs, TargetArgs};

#[derive(Parser)]
#[command(name = "refdata-reconciler")]
#[command(about = "Reconcile upstream reference data snapshots into PostgreSQL", long_about = None)]
#[command(version)]
struct Cli {
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch upstream snapshots and bring the target tables in line with them
    Reconcile(ReconcileArgs),
    /// Show what `reconcile` would change without writing anything
    Plan(ReconcileArgs),
    /// Manage the default target database URL
    Target(TargetArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Reconcile(args) => {
            commands::reconcile::command(args, cli.allow_self_signed_certs).await
        }
        Commands::Plan(mut args) => {
            args.dry_run = true;
            commands::reconcile::command(args, cli.allow_self_signed_certs).await
        }
        Commands::Target(args) => commands::target::command(args).await,
    }
}
