//! Shared helpers for the CLI: tracing setup, configuration and input.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use strongbox_vault::{Vault, VaultConfig};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// `RUST_LOG` wins when set.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load the config file (if present) and apply `STRONGBOX_*` overrides.
pub fn load_config(path: &Path) -> Result<VaultConfig> {
    let config = VaultConfig::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?
        .apply_env()
        .context("invalid STRONGBOX_* environment override")?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

/// Open the vault described by `config`.
pub fn open_vault(config: &VaultConfig) -> Result<Vault> {
    Vault::open(config).with_context(|| {
        format!(
            "failed to open vault database at {}",
            config.database_path.display()
        )
    })
}

/// The environment slug to use: the explicit one, else the configured default.
pub fn environment_slug(explicit: Option<String>, config: &VaultConfig) -> String {
    explicit.unwrap_or_else(|| config.default_environment.clone())
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Read all of stdin.
pub fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read stdin")?;
    Ok(buf)
}

/// Read a file, or stdin when `path` is `-`.
pub fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        return read_stdin();
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// The given value, or stdin with one trailing newline removed.
pub fn value_or_stdin(value: Option<String>) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => {
            let mut input = read_stdin()?;
            if input.ends_with('\n') {
                input.pop();
                if input.ends_with('\r') {
                    input.pop();
                }
            }
            Ok(input)
        }
    }
}
