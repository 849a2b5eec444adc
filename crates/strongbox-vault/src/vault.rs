//! The assembled vault: one database handle shared by every component.

use crate::access::AccessChecker;
use crate::config::{MasterKey, VaultConfig};
use crate::counters::SqliteCounterStore;
use crate::db::Database;
use crate::encryptor::Encryptor;
use crate::error::Result;
use crate::keys::KeyManager;
use crate::secrets::SecretStore;

/// Key manager, encryptor, secret store, access checker and HOTP counter
/// store wired to the same database.
///
/// # Example
///
/// ```rust
/// use strongbox_vault::{MasterKey, NewSecret, Vault};
///
/// # fn example() -> strongbox_vault::Result<()> {
/// let vault = Vault::open_in_memory(MasterKey::development())?;
/// let env = vault.secrets().create_environment("acme", "production", "Production")?;
/// let secret = vault.secrets().create_secret("acme", NewSecret::new("DATABASE_URL"))?;
/// vault.secrets().set_value(&secret, &env, "postgres://db/acme", Some("ops"), None)?;
///
/// let value = vault.secrets().resolve("acme", "production", "DATABASE_URL")?;
/// assert_eq!(value.as_deref(), Some("postgres://db/acme"));
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Clone)]
pub struct Vault {
    db: Database,
    keys: KeyManager,
    secrets: SecretStore,
    access: AccessChecker,
    counters: SqliteCounterStore,
}

impl Vault {
    /// Validate the master key and open the configured database.
    ///
    /// # Errors
    ///
    /// [`crate::VaultError::Configuration`] when production mode has no
    /// master key, or any database error from opening and migrating.
    pub fn open(config: &VaultConfig) -> Result<Self> {
        let master_key = MasterKey::from_config(config)?;
        let db = Database::open(&config.database_path)?;
        tracing::info!(mode = %config.mode, "vault ready");
        Ok(Self::with_database(db, master_key))
    }

    pub fn open_in_memory(master_key: MasterKey) -> Result<Self> {
        Ok(Self::with_database(Database::open_in_memory()?, master_key))
    }

    pub fn with_database(db: Database, master_key: MasterKey) -> Self {
        let keys = KeyManager::new(db.clone(), master_key);
        let secrets = SecretStore::new(db.clone(), Encryptor::new(keys.clone()));
        Self {
            access: AccessChecker::new(db.clone()),
            counters: SqliteCounterStore::new(db.clone()),
            db,
            keys,
            secrets,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn encryptor(&self) -> &Encryptor {
        self.secrets.encryptor()
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    pub fn access(&self) -> &AccessChecker {
        &self.access
    }

    pub fn counters(&self) -> &SqliteCounterStore {
        &self.counters
    }
}
