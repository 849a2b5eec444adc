//! SQLite database handle.
//!
//! [`Database`] wraps a `rusqlite::Connection` behind an `Arc<Mutex<>>` so
//! the key manager, secret store, access checker and counter store can
//! share one connection. The mutex only serializes use of the connection;
//! the invariants that matter under concurrency (one active key per
//! project, one current version per secret and environment) are enforced
//! by unique indexes in the schema, so they also hold across processes
//! sharing the same file.
//!
//! Closures passed to [`Database::execute`] must not call back into
//! another component that uses the same handle.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{Result, VaultError};
use crate::migration;

/// Thread-safe handle to the vault database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database at `path` and run pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening vault database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a fresh in-memory database, useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        tracing::debug!("opening in-memory vault database");
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        Self::apply_pragmas(&conn)?;
        migration::run_all(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection.
    pub fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VaultError::Internal(format!("connection mutex poisoned: {e}")))?;
        f(&conn)
    }

    /// Run `f` with mutable access, for transactions.
    pub fn execute_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| VaultError::Internal(format!("connection mutex poisoned: {e}")))?;
        f(&mut conn)
    }

    fn apply_pragmas(conn: &Connection) -> Result<()> {
        // In-memory databases report "memory" here; the call still succeeds.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        // Concurrent writers wait instead of failing immediately.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;
        Ok(())
    }
}
