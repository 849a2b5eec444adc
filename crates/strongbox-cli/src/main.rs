//! CLI entry point for Strongbox.
//!
//! This binary provides the `strongbox` command: vault administration
//! (`keys`, `env`, `secrets`) over the configured database, plus the
//! stateless `otp` and `ssh` tools.

mod cli;
mod helpers;
mod otp_commands;
mod ssh_commands;
mod vault_commands;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::helpers::{init_tracing, load_config, open_vault};

fn main() -> Result<()> {
    // A missing .env file is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "warn" });

    match cli.command {
        Commands::Keys { project, action } => {
            let config = load_config(&cli.config)?;
            let vault = open_vault(&config)?;
            vault_commands::keys(&vault, &project.project, action)
        }
        Commands::Env { project, action } => {
            let config = load_config(&cli.config)?;
            let vault = open_vault(&config)?;
            vault_commands::env(&vault, &project.project, action)
        }
        Commands::Secrets { project, action } => {
            let config = load_config(&cli.config)?;
            let vault = open_vault(&config)?;
            vault_commands::secrets(&vault, &config, &project.project, action)
        }
        Commands::Otp { action } => otp_commands::otp(action),
        Commands::Ssh { action } => ssh_commands::ssh(action),
    }
}
