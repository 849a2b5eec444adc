//! Per-project data keys.
//!
//! Every project has at most one `active` data key, wrapped under the
//! [`MasterKey`] with AES-256-GCM and stored in `encryption_keys`. Rotation
//! adds a new active key and retires the previous one; retired keys are
//! kept forever so versions written under them stay readable.
//!
//! Concurrency relies on the schema, not on in-process locks:
//!
//! - `current_key` inserts with `INSERT OR IGNORE` against the partial
//!   unique index on active keys, then re-reads, so racing callers converge
//!   on the same key.
//! - `rotate_key` runs in one immediate transaction: the old key moves to
//!   `rotating`, the new key is inserted as `active`, and the old key is
//!   retired. Readers see either the old or the new active key, never none.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::MasterKey;
use crate::crypto::{self, KEY_LEN, KEY_TYPE};
use crate::db::Database;
use crate::error::{Result, VaultError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    /// Transient state inside a rotation transaction.
    Rotating,
    Retired,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Rotating => "rotating",
            Self::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "rotating" => Some(Self::Rotating),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key metadata, without key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub key_id: String,
    pub project_id: String,
    pub status: KeyStatus,
    pub key_type: String,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

/// An unwrapped data key. The material is wiped on drop.
#[derive(Clone)]
pub struct DataKey {
    pub key_id: String,
    pub project_id: String,
    material: Zeroizing<[u8; KEY_LEN]>,
}

impl DataKey {
    pub fn material(&self) -> &[u8] {
        &self.material[..]
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("key_id", &self.key_id)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

/// Stored form of a key row.
struct StoredKey {
    meta: EncryptionKey,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
}

const KEY_COLUMNS: &str =
    "key_id, project_id, status, encrypted_key, iv, key_type, created_at, retired_at";

// ---------------------------------------------------------------------------
// Key manager
// ---------------------------------------------------------------------------

/// Creates, looks up and rotates project data keys.
#[derive(Clone)]
pub struct KeyManager {
    db: Database,
    master_key: MasterKey,
}

impl KeyManager {
    pub fn new(db: Database, master_key: MasterKey) -> Self {
        Self { db, master_key }
    }

    /// The project's active key, created on first use.
    pub fn current_key(&self, project_id: &str) -> Result<DataKey> {
        if let Some(stored) = self.db.execute(|conn| select_active(conn, project_id))? {
            return self.unwrap_key(stored);
        }

        let (key_id, encrypted_key, iv) = self.wrap_new_key()?;
        let inserted = self.db.execute(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO encryption_keys
                    (key_id, project_id, status, encrypted_key, iv, key_type, created_at)
                 VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?6)",
                params![
                    key_id,
                    project_id,
                    encrypted_key,
                    iv.as_slice(),
                    KEY_TYPE,
                    Utc::now().timestamp()
                ],
            )?)
        })?;
        if inserted == 1 {
            tracing::info!(project_id, key_id = %key_id, "created project data key");
        } else {
            tracing::debug!(project_id, "lost race creating data key, using the winner");
        }

        let stored = self
            .db
            .execute(|conn| select_active(conn, project_id))?
            .ok_or_else(|| VaultError::not_found("active key", project_id))?;
        self.unwrap_key(stored)
    }

    /// Key material for a specific key id, active or retired.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] when the key does not exist or belongs to
    /// another project.
    pub fn get_key(&self, key_id: &str, project_id: &str) -> Result<DataKey> {
        let stored = self
            .db
            .execute(|conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "SELECT {KEY_COLUMNS} FROM encryption_keys
                             WHERE key_id = ?1 AND project_id = ?2"
                        ),
                        params![key_id, project_id],
                        stored_key_from_row,
                    )
                    .optional()?)
            })?
            .ok_or_else(|| VaultError::not_found("encryption key", key_id))?;
        tracing::trace!(project_id, key_id, "loaded data key");
        self.unwrap_key(stored)
    }

    /// Create a new active key for a project that has none.
    ///
    /// # Errors
    ///
    /// [`VaultError::Validation`] when the project already has an active
    /// key; use [`rotate_key`](Self::rotate_key) instead.
    pub fn create_key(&self, project_id: &str) -> Result<EncryptionKey> {
        let (key_id, encrypted_key, iv) = self.wrap_new_key()?;
        let now = Utc::now();

        let result = self.db.execute(|conn| {
            insert_key(conn, &key_id, project_id, KeyStatus::Active, &encrypted_key, &iv, now)
        });
        match result {
            Err(VaultError::Database(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(VaultError::validation(format!(
                    "project {project_id} already has an active key"
                )));
            }
            other => other?,
        }

        tracing::info!(project_id, key_id = %key_id, "created project data key");
        Ok(EncryptionKey {
            key_id,
            project_id: project_id.to_string(),
            status: KeyStatus::Active,
            key_type: KEY_TYPE.to_string(),
            created_at: from_timestamp(now.timestamp()),
            retired_at: None,
        })
    }

    /// Replace the active key with a new one and retire the old one.
    ///
    /// Data already encrypted keeps its key id and stays decryptable.
    pub fn rotate_key(&self, project_id: &str) -> Result<EncryptionKey> {
        let (key_id, encrypted_key, iv) = self.wrap_new_key()?;
        let now = Utc::now();

        let retired = self.db.execute_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let previous: Option<String> = tx
                .query_row(
                    "SELECT key_id FROM encryption_keys
                     WHERE project_id = ?1 AND status = 'active'",
                    params![project_id],
                    |row| row.get(0),
                )
                .optional()?;

            tx.execute(
                "UPDATE encryption_keys SET status = 'rotating'
                 WHERE project_id = ?1 AND status = 'active'",
                params![project_id],
            )?;
            insert_key(&tx, &key_id, project_id, KeyStatus::Active, &encrypted_key, &iv, now)?;
            tx.execute(
                "UPDATE encryption_keys SET status = 'retired', retired_at = ?2
                 WHERE project_id = ?1 AND status = 'rotating'",
                params![project_id, now.timestamp()],
            )?;
            tx.commit()?;
            Ok(previous)
        })?;

        tracing::info!(
            project_id,
            key_id = %key_id,
            retired_key_id = retired.as_deref().unwrap_or("none"),
            "rotated project data key"
        );

        Ok(EncryptionKey {
            key_id,
            project_id: project_id.to_string(),
            status: KeyStatus::Active,
            key_type: KEY_TYPE.to_string(),
            created_at: from_timestamp(now.timestamp()),
            retired_at: None,
        })
    }

    /// Every key of the project, newest first.
    pub fn list_keys(&self, project_id: &str) -> Result<Vec<EncryptionKey>> {
        self.db.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {KEY_COLUMNS} FROM encryption_keys
                 WHERE project_id = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let keys = stmt
                .query_map(params![project_id], stored_key_from_row)?
                .map(|row| row.map(|stored| stored.meta))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }

    // -- Internals ----------------------------------------------------------

    fn wrap_new_key(&self) -> Result<(String, Vec<u8>, [u8; crypto::IV_LEN])> {
        let material = crypto::generate_key()?;
        let (iv, encrypted_key) = crypto::encrypt(&material[..], self.master_key.as_bytes())?;
        Ok((uuid::Uuid::now_v7().to_string(), encrypted_key, iv))
    }

    fn unwrap_key(&self, stored: StoredKey) -> Result<DataKey> {
        let raw = crypto::decrypt(&stored.iv, &stored.encrypted_key, self.master_key.as_bytes())
            .inspect_err(|_| {
                tracing::error!(
                    key_id = %stored.meta.key_id,
                    "data key failed to unwrap under the configured master key"
                );
            })?;
        if raw.len() != KEY_LEN {
            return Err(VaultError::DecryptionFailed {
                reason: format!("unwrapped key is {} bytes, expected {KEY_LEN}", raw.len()),
            });
        }
        let mut material = Zeroizing::new([0u8; KEY_LEN]);
        material.copy_from_slice(&raw);
        Ok(DataKey {
            key_id: stored.meta.key_id,
            project_id: stored.meta.project_id,
            material,
        })
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn select_active(conn: &Connection, project_id: &str) -> Result<Option<StoredKey>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {KEY_COLUMNS} FROM encryption_keys
                 WHERE project_id = ?1 AND status = 'active'"
            ),
            params![project_id],
            stored_key_from_row,
        )
        .optional()?)
}

fn insert_key(
    conn: &Connection,
    key_id: &str,
    project_id: &str,
    status: KeyStatus,
    encrypted_key: &[u8],
    iv: &[u8],
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO encryption_keys
            (key_id, project_id, status, encrypted_key, iv, key_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            key_id,
            project_id,
            status.as_str(),
            encrypted_key,
            iv,
            KEY_TYPE,
            now.timestamp()
        ],
    )?;
    Ok(())
}

fn stored_key_from_row(row: &Row<'_>) -> rusqlite::Result<StoredKey> {
    let status: String = row.get(2)?;
    let status = KeyStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown key status {status:?}").into(),
        )
    })?;
    Ok(StoredKey {
        meta: EncryptionKey {
            key_id: row.get(0)?,
            project_id: row.get(1)?,
            status,
            key_type: row.get(5)?,
            created_at: from_timestamp(row.get(6)?),
            retired_at: row.get::<_, Option<i64>>(7)?.map(from_timestamp),
        },
        encrypted_key: row.get(3)?,
        iv: row.get(4)?,
    })
}

pub(crate) fn from_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> KeyManager {
        KeyManager::new(Database::open_in_memory().unwrap(), MasterKey::development())
    }

    #[test]
    fn current_key_is_created_once() {
        let keys = manager();
        let first = keys.current_key("proj").unwrap();
        let second = keys.current_key("proj").unwrap();
        assert_eq!(first.key_id, second.key_id);
        assert_eq!(first.material(), second.material());
        assert_eq!(first.material().len(), KEY_LEN);
        assert_eq!(keys.list_keys("proj").unwrap().len(), 1);
    }

    #[test]
    fn projects_get_distinct_keys() {
        let keys = manager();
        let a = keys.current_key("a").unwrap();
        let b = keys.current_key("b").unwrap();
        assert_ne!(a.key_id, b.key_id);
        assert_ne!(a.material(), b.material());
    }

    #[test]
    fn get_key_checks_project() {
        let keys = manager();
        let key = keys.current_key("a").unwrap();
        assert_eq!(keys.get_key(&key.key_id, "a").unwrap().material(), key.material());
        assert!(matches!(
            keys.get_key(&key.key_id, "b"),
            Err(VaultError::NotFound { .. })
        ));
        assert!(matches!(
            keys.get_key("missing", "a"),
            Err(VaultError::NotFound { .. })
        ));
    }

    #[test]
    fn create_key_refuses_second_active() {
        let keys = manager();
        let created = keys.create_key("p").unwrap();
        assert_eq!(created.status, KeyStatus::Active);
        assert!(matches!(
            keys.create_key("p"),
            Err(VaultError::Validation { .. })
        ));
        assert_eq!(keys.current_key("p").unwrap().key_id, created.key_id);
    }

    #[test]
    fn rotation_retires_previous_key() {
        let keys = manager();
        let old = keys.current_key("p").unwrap();
        let new = keys.rotate_key("p").unwrap();
        assert_ne!(old.key_id, new.key_id);
        assert_eq!(keys.current_key("p").unwrap().key_id, new.key_id);

        let listed = keys.list_keys("p").unwrap();
        assert_eq!(listed.len(), 2);
        let retired = listed.iter().find(|k| k.key_id == old.key_id).unwrap();
        assert_eq!(retired.status, KeyStatus::Retired);
        assert!(retired.retired_at.is_some());
        assert_eq!(
            listed.iter().filter(|k| k.status == KeyStatus::Active).count(),
            1
        );

        // Retired material is still available.
        assert_eq!(keys.get_key(&old.key_id, "p").unwrap().material(), old.material());
    }

    #[test]
    fn rotate_without_existing_key_creates_one() {
        let keys = manager();
        let created = keys.rotate_key("fresh").unwrap();
        assert_eq!(keys.current_key("fresh").unwrap().key_id, created.key_id);
    }

    #[test]
    fn wrong_master_key_cannot_unwrap() {
        let db = Database::open_in_memory().unwrap();
        let key = KeyManager::new(db.clone(), MasterKey::development())
            .current_key("p")
            .unwrap();

        let other = KeyManager::new(db, MasterKey::from_secret("another master key"));
        let err = other.get_key(&key.key_id, "p").unwrap_err();
        assert!(err.is_security_event());
    }

    #[test]
    fn debug_hides_material() {
        let key = manager().current_key("p").unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains(&key.key_id));
        assert!(!debug.contains("material"));
    }
}
