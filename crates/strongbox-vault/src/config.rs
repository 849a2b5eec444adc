//! Runtime configuration and the process-wide master key.
//!
//! Configuration is read from a TOML file and then overridden by
//! `STRONGBOX_*` environment variables. The master key is validated once at
//! startup by [`MasterKey::from_config`] and threaded explicitly into the
//! [`KeyManager`](crate::keys::KeyManager).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN};
use crate::error::{Result, VaultError};

pub const ENV_MODE: &str = "STRONGBOX_MODE";
pub const ENV_MASTER_KEY: &str = "STRONGBOX_MASTER_KEY";
pub const ENV_DATABASE: &str = "STRONGBOX_DATABASE";

/// Publicly known key used outside production when none is configured.
const DEVELOPMENT_MASTER_KEY: &str = "strongbox-development-master-key-do-not-use-in-production";

// ---------------------------------------------------------------------------
// Run mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Development,
    Test,
    Production,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "test" => Some(Self::Test),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub mode: RunMode,
    /// 64 hex characters, or any passphrase (hashed to 32 bytes).
    pub master_key: Option<String>,
    pub database_path: PathBuf,
    /// Environment slug used when a command does not name one.
    pub default_environment: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Development,
            master_key: None,
            database_path: PathBuf::from("data/strongbox.db"),
            default_environment: "development".into(),
        }
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("mode", &self.mode)
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .field("database_path", &self.database_path)
            .field("default_environment", &self.default_environment)
            .finish()
    }
}

impl VaultConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| VaultError::Configuration {
            reason: format!("failed to parse TOML config: {e}"),
        })
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), mode = %config.mode, "loaded config file");
        Ok(config)
    }

    /// Apply `STRONGBOX_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_MODE) {
            self.mode = RunMode::parse(&mode).ok_or_else(|| VaultError::Configuration {
                reason: format!(
                    "{ENV_MODE}={mode:?} is not one of development, test, production"
                ),
            })?;
        }
        if let Some(key) = lookup(ENV_MASTER_KEY).filter(|k| !k.trim().is_empty()) {
            self.master_key = Some(key);
        }
        if let Some(path) = lookup(ENV_DATABASE).filter(|p| !p.trim().is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// The 256-bit key that wraps every project data key.
#[derive(Clone)]
pub struct MasterKey(Zeroizing<[u8; KEY_LEN]>);

impl MasterKey {
    /// Validate the configured master key for the run mode.
    ///
    /// # Errors
    ///
    /// [`VaultError::Configuration`] when running in production without a
    /// master key. Other modes fall back to a fixed development key.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        match config.master_key.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => Ok(Self::from_secret(secret)),
            _ if config.mode == RunMode::Production => Err(VaultError::Configuration {
                reason: format!("{ENV_MASTER_KEY} must be set in production"),
            }),
            _ => {
                tracing::warn!(
                    mode = %config.mode,
                    "no master key configured, using the insecure development key"
                );
                Ok(Self::development())
            }
        }
    }

    /// 64 hex characters decode to the raw key; anything else is hashed.
    pub fn from_secret(secret: &str) -> Self {
        if secret.len() == KEY_LEN * 2 {
            if let Ok(raw) = data_encoding::HEXLOWER_PERMISSIVE.decode(secret.as_bytes()) {
                let raw = Zeroizing::new(raw);
                let mut key = Zeroizing::new([0u8; KEY_LEN]);
                key.copy_from_slice(&raw);
                return Self(key);
            }
        }
        Self(crypto::sha256_key(secret.as_bytes()))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn development() -> Self {
        Self::from_secret(DEVELOPMENT_MASTER_KEY)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}
