// ABOUTME: `target` subcommand - persists the default target database URL
// ABOUTME: Set validates the URL; output always masks the password

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::state;
use crate::utils::{mask_password, validate_connection_string};

#[derive(Args)]
pub struct TargetArgs {
    #[command(subcommand)]
    command: TargetCommands,
}

#[derive(Subcommand)]
enum TargetCommands {
    /// Set the target database URL
    Set {
        /// The PostgreSQL URL to reconcile into
        url: String,
    },
    /// Unset the target database URL
    Unset,
    /// Show the current target database URL
    Get,
}

pub async fn command(args: TargetArgs) -> Result<()> {
    match args.command {
        TargetCommands::Set { url } => {
            validate_connection_string(&url)?;
            let mut state = state::load().context("Failed to load state")?;
            state.target_url = Some(url.clone());
            state::save(&state).context("Failed to save state")?;
            println!("Target database URL set to: {}", mask_password(&url));
        }
        TargetCommands::Unset => {
            let mut state = state::load().context("Failed to load state")?;
            state.target_url = None;
            state::save(&state).context("Failed to save state")?;
            println!("Target database URL unset.");
        }
        TargetCommands::Get => {
            let state = state::load().context("Failed to load state")?;
            match state.target_url {
                Some(url) => println!("Current target database URL: {}", mask_password(&url)),
                None => println!("Target database URL is not set."),
            }
        }
    }
    Ok(())
}
