//! Multi-tenant secrets vault for Strongbox.
//!
//! Secret values are stored encrypted with AES-256-GCM under per-project
//! data keys, which are themselves wrapped under a single master key
//! (envelope encryption). Values are versioned per environment, resolved
//! by key or path, and guarded by glob-based access policies.
//!
//! # Modules
//!
//! - [`crypto`]: AES-256-GCM primitives and key generation.
//! - [`config`]: TOML/env configuration and master key validation.
//! - [`db`] / [`migration`]: SQLite handle and schema.
//! - [`keys`]: per-project data keys: creation, lookup, rotation.
//! - [`encryptor`]: envelope encryption of payloads.
//! - [`secrets`]: environments, secrets, versions and resolution.
//! - [`transfer`]: dotenv/JSON import and dotenv/shell/JSON/k8s/YAML export.
//! - [`access`]: principals, permissions and policy evaluation.
//! - [`counters`]: SQLite-backed HOTP counter store.
//! - [`vault`]: everything wired to one database.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust
//! use strongbox_vault::{ExportFormat, ImportFormat, MasterKey, Vault};
//!
//! # fn example() -> strongbox_vault::Result<()> {
//! let vault = Vault::open_in_memory(MasterKey::development())?;
//! vault.secrets().create_environment("acme", "staging", "Staging")?;
//!
//! let report = vault.secrets().import(
//!     "acme",
//!     "staging",
//!     ImportFormat::Dotenv,
//!     "API_KEY=sk_test_123\nGREETING=\"hello world\"\n",
//!     Some("ci"),
//! )?;
//! assert_eq!(report.created.len(), 2);
//!
//! let dotenv = vault.secrets().export("acme", "staging", ExportFormat::Dotenv, None)?;
//! assert_eq!(dotenv, "API_KEY=sk_test_123\nGREETING=\"hello world\"\n");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod access;
pub mod config;
pub mod counters;
pub mod crypto;
pub mod db;
pub mod encryptor;
pub mod error;
pub mod keys;
pub mod migration;
pub mod secrets;
pub mod transfer;
pub mod vault;

pub use access::{AccessChecker, AccessPolicy, NewPolicy, Permission, Principal};
pub use config::{MasterKey, RunMode, VaultConfig};
pub use counters::SqliteCounterStore;
pub use db::Database;
pub use encryptor::{EncryptedPayload, Encryptor};
pub use error::{Result, VaultError};
pub use keys::{DataKey, EncryptionKey, KeyManager, KeyStatus};
pub use secrets::{Environment, NewSecret, Secret, SecretStore, SecretVersion, VersionOptions};
pub use transfer::{ExportFormat, ImportFailure, ImportFormat, ImportReport};
pub use vault::Vault;
