//! Secret versioning and resolution.
//!
//! A [`Secret`] is a named, path-addressed entry in a project. Its values
//! live in `secret_versions`, one append-only sequence per
//! (secret, environment) pair:
//!
//! - version numbers start at 1 and increase by one per write;
//! - exactly one version per pair is `current`, enforced by a partial
//!   unique index and flipped inside a single transaction;
//! - each version keeps the key id it was encrypted with, so key rotation
//!   never rewrites history.
//!
//! Archived secrets and expired versions are invisible to resolution.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::encryptor::Encryptor;
use crate::error::{Result, VaultError};
use crate::keys::from_timestamp;

/// `${KEY}` placeholders in templates.
const REFERENCE_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_.\-]*)\}";

pub const DEFAULT_SECRET_TYPE: &str = "generic";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A deployment context such as `development` or `production`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub project_id: String,
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,
    pub project_id: String,
    /// Identifier used in exports and `${KEY}` references.
    pub key: String,
    pub path: String,
    pub secret_type: String,
    pub tags: BTreeMap<String, String>,
    pub description: Option<String>,
    /// Rotation interval in days, if the secret should be rotated.
    pub rotation_days: Option<u32>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`SecretStore::create_secret`].
#[derive(Debug, Clone, Default)]
pub struct NewSecret {
    pub key: String,
    /// Defaults to the key.
    pub path: Option<String>,
    pub secret_type: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub description: Option<String>,
    pub rotation_days: Option<u32>,
}

impl NewSecret {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_type(mut self, secret_type: impl Into<String>) -> Self {
        self.secret_type = Some(secret_type.into());
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn with_rotation_days(mut self, days: u32) -> Self {
        self.rotation_days = Some(days);
        self
    }
}

/// Version metadata. Never carries plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretVersion {
    pub id: i64,
    pub secret_id: String,
    pub environment_id: String,
    pub version: u32,
    pub key_id: String,
    pub current: bool,
    pub created_by: Option<String>,
    pub note: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Optional attributes of a write.
#[derive(Debug, Clone, Default)]
pub struct VersionOptions {
    pub created_by: Option<String>,
    pub note: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Encrypted value of one version, as read from storage.
struct StoredValue {
    key: String,
    encrypted_value: Vec<u8>,
    iv: Vec<u8>,
    key_id: String,
}

const ENV_COLUMNS: &str = "id, project_id, slug, name, created_at";

const SECRET_COLUMNS: &str = "s.id, s.project_id, s.key, s.path, s.secret_type, s.tags, \
     s.description, s.rotation_days, s.archived, s.created_at, s.updated_at";

const VERSION_COLUMNS: &str = "id, secret_id, environment_id, version, key_id, current, \
     created_by, note, expires_at, created_at";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Versioned secret storage over the shared database.
#[derive(Clone)]
pub struct SecretStore {
    db: Database,
    encryptor: Encryptor,
}

impl SecretStore {
    pub fn new(db: Database, encryptor: Encryptor) -> Self {
        Self { db, encryptor }
    }

    pub fn encryptor(&self) -> &Encryptor {
        &self.encryptor
    }

    // -- Environments -------------------------------------------------------

    pub fn create_environment(
        &self,
        project_id: &str,
        slug: &str,
        name: &str,
    ) -> Result<Environment> {
        if slug.is_empty()
            || !slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(VaultError::validation(format!(
                "environment slug {slug:?} must be non-empty lowercase letters, digits, '-' or '_'"
            )));
        }

        let env = Environment {
            id: uuid::Uuid::now_v7().to_string(),
            project_id: project_id.to_string(),
            slug: slug.to_string(),
            name: (if name.is_empty() { slug } else { name }).to_string(),
            created_at: from_timestamp(Utc::now().timestamp()),
        };

        let result = self.db.execute(|conn| {
            conn.execute(
                "INSERT INTO environments (id, project_id, slug, name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    env.id,
                    env.project_id,
                    env.slug,
                    env.name,
                    env.created_at.timestamp()
                ],
            )?;
            Ok(())
        });
        if is_constraint_violation(&result) {
            return Err(VaultError::validation(format!(
                "environment {slug} already exists in project {project_id}"
            )));
        }
        result?;

        tracing::info!(project_id, environment = %env.slug, "created environment");
        Ok(env)
    }

    /// Look up an environment by slug.
    pub fn environment(&self, project_id: &str, slug: &str) -> Result<Environment> {
        self.db
            .execute(|conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "SELECT {ENV_COLUMNS} FROM environments
                             WHERE project_id = ?1 AND slug = ?2"
                        ),
                        params![project_id, slug],
                        environment_from_row,
                    )
                    .optional()?)
            })?
            .ok_or_else(|| VaultError::not_found("environment", slug))
    }

    pub fn list_environments(&self, project_id: &str) -> Result<Vec<Environment>> {
        self.db.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENV_COLUMNS} FROM environments WHERE project_id = ?1 ORDER BY slug"
            ))?;
            let envs = stmt
                .query_map(params![project_id], environment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(envs)
        })
    }

    // -- Secrets ------------------------------------------------------------

    pub fn create_secret(&self, project_id: &str, new: NewSecret) -> Result<Secret> {
        validate_key(&new.key)?;
        let path = new.path.unwrap_or_else(|| new.key.clone());
        if path.trim().is_empty() {
            return Err(VaultError::validation("secret path must not be empty"));
        }

        let now = from_timestamp(Utc::now().timestamp());
        let secret = Secret {
            id: uuid::Uuid::now_v7().to_string(),
            project_id: project_id.to_string(),
            key: new.key,
            path,
            secret_type: new
                .secret_type
                .unwrap_or_else(|| DEFAULT_SECRET_TYPE.to_string()),
            tags: new.tags,
            description: new.description,
            rotation_days: new.rotation_days,
            archived: false,
            created_at: now,
            updated_at: now,
        };
        let tags = serde_json::to_string(&secret.tags)?;

        let result = self.db.execute(|conn| {
            conn.execute(
                "INSERT INTO secrets (id, project_id, key, path, secret_type, tags,
                     description, rotation_days, archived, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
                params![
                    secret.id,
                    secret.project_id,
                    secret.key,
                    secret.path,
                    secret.secret_type,
                    tags,
                    secret.description,
                    secret.rotation_days,
                    now.timestamp()
                ],
            )?;
            Ok(())
        });
        if is_constraint_violation(&result) {
            return Err(VaultError::validation(format!(
                "secret {} already exists in project {project_id}",
                secret.key
            )));
        }
        result?;

        tracing::info!(project_id, secret = %secret.key, path = %secret.path, "created secret");
        Ok(secret)
    }

    /// Find a secret by key, falling back to path. A live match wins over
    /// an archived one. Archived secrets are returned when nothing live
    /// matches; callers decide what archival means for them.
    pub fn find_secret(&self, project_id: &str, key_or_path: &str) -> Result<Option<Secret>> {
        self.db.execute(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {SECRET_COLUMNS} FROM secrets s
                         WHERE s.project_id = ?1 AND (s.key = ?2 OR s.path = ?2)
                         ORDER BY s.archived ASC, (s.key = ?2) DESC, s.created_at ASC
                         LIMIT 1"
                    ),
                    params![project_id, key_or_path],
                    secret_from_row,
                )
                .optional()?)
        })
    }

    /// Like [`find_secret`](Self::find_secret), but absence is an error.
    pub fn secret(&self, project_id: &str, key_or_path: &str) -> Result<Secret> {
        self.find_secret(project_id, key_or_path)?
            .ok_or_else(|| VaultError::not_found("secret", key_or_path))
    }

    pub fn list_secrets(&self, project_id: &str, include_archived: bool) -> Result<Vec<Secret>> {
        self.db
            .execute(|conn| query_secrets(conn, project_id, include_archived))
    }

    /// Soft-delete: the secret and its history stay, resolution skips it.
    pub fn archive(&self, secret: &Secret) -> Result<()> {
        self.set_archived(secret, true)
    }

    pub fn unarchive(&self, secret: &Secret) -> Result<()> {
        self.set_archived(secret, false)
    }

    fn set_archived(&self, secret: &Secret, archived: bool) -> Result<()> {
        let changed = self.db.execute(|conn| {
            Ok(conn.execute(
                "UPDATE secrets SET archived = ?2, updated_at = ?3 WHERE id = ?1",
                params![secret.id, archived, Utc::now().timestamp()],
            )?)
        })?;
        if changed == 0 {
            return Err(VaultError::not_found("secret", &secret.key));
        }
        tracing::info!(
            project_id = %secret.project_id,
            secret = %secret.key,
            archived,
            "changed secret archival"
        );
        Ok(())
    }

    // -- Writes -------------------------------------------------------------

    /// Encrypt `value` and make it the current version for `environment`.
    pub fn set_value(
        &self,
        secret: &Secret,
        environment: &Environment,
        value: &str,
        user: Option<&str>,
        note: Option<&str>,
    ) -> Result<SecretVersion> {
        let options = VersionOptions {
            created_by: user.map(str::to_string),
            note: note.map(str::to_string),
            expires_at: None,
        };
        self.set_value_with(secret, environment, value, &options)
    }

    /// [`set_value`](Self::set_value) with every version attribute exposed.
    pub fn set_value_with(
        &self,
        secret: &Secret,
        environment: &Environment,
        value: &str,
        options: &VersionOptions,
    ) -> Result<SecretVersion> {
        if secret.project_id != environment.project_id {
            return Err(VaultError::validation(format!(
                "environment {} does not belong to project {}",
                environment.slug, secret.project_id
            )));
        }

        // Encrypt before taking the write transaction: the key manager uses
        // the same connection.
        let payload = self.encryptor.encrypt_str(value, &secret.project_id)?;
        let now = from_timestamp(Utc::now().timestamp());

        let version = self.db.execute_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let archived: Option<bool> = tx
                .query_row(
                    "SELECT archived FROM secrets WHERE id = ?1",
                    params![secret.id],
                    |row| row.get(0),
                )
                .optional()?;
            match archived {
                None => return Err(VaultError::not_found("secret", &secret.key)),
                Some(true) => {
                    return Err(VaultError::validation(format!(
                        "secret {} is archived",
                        secret.key
                    )));
                }
                Some(false) => {}
            }

            let next: u32 = tx.query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM secret_versions
                 WHERE secret_id = ?1 AND environment_id = ?2",
                params![secret.id, environment.id],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE secret_versions SET current = 0
                 WHERE secret_id = ?1 AND environment_id = ?2 AND current = 1",
                params![secret.id, environment.id],
            )?;
            tx.execute(
                "INSERT INTO secret_versions (secret_id, environment_id, version,
                     encrypted_value, iv, key_id, current, created_by, note, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?10)",
                params![
                    secret.id,
                    environment.id,
                    next,
                    payload.ciphertext,
                    payload.iv.as_slice(),
                    payload.key_id,
                    options.created_by,
                    options.note,
                    options.expires_at.map(|t| t.timestamp()),
                    now.timestamp()
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE secrets SET updated_at = ?2 WHERE id = ?1",
                params![secret.id, now.timestamp()],
            )?;
            tx.commit()?;

            Ok(SecretVersion {
                id,
                secret_id: secret.id.clone(),
                environment_id: environment.id.clone(),
                version: next,
                key_id: payload.key_id.clone(),
                current: true,
                created_by: options.created_by.clone(),
                note: options.note.clone(),
                expires_at: options
                    .expires_at
                    .map(|t| from_timestamp(t.timestamp())),
                created_at: now,
            })
        })?;

        tracing::info!(
            project_id = %secret.project_id,
            secret = %secret.key,
            environment = %environment.slug,
            version = version.version,
            key_id = %version.key_id,
            "stored secret version"
        );
        Ok(version)
    }

    /// Write the value of an earlier version as a new current version.
    pub fn rollback(
        &self,
        secret: &Secret,
        environment: &Environment,
        version: u32,
        user: Option<&str>,
    ) -> Result<SecretVersion> {
        let stored = self
            .db
            .execute(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT ?3, encrypted_value, iv, key_id FROM secret_versions
                         WHERE secret_id = ?1 AND environment_id = ?2 AND version = ?4",
                        params![secret.id, environment.id, secret.key, version],
                        stored_value_from_row,
                    )
                    .optional()?)
            })?
            .ok_or_else(|| {
                VaultError::not_found("secret version", format!("{} v{version}", secret.key))
            })?;

        let value = self.decrypt_stored(&secret.project_id, &stored)?;
        let options = VersionOptions {
            created_by: user.map(str::to_string),
            note: Some(format!("rollback to v{version}")),
            expires_at: None,
        };
        self.set_value_with(secret, environment, &value, &options)
    }

    // -- Reads --------------------------------------------------------------

    /// Version metadata for one secret in one environment, newest first.
    pub fn history(&self, secret: &Secret, environment: &Environment) -> Result<Vec<SecretVersion>> {
        self.db.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM secret_versions
                 WHERE secret_id = ?1 AND environment_id = ?2
                 ORDER BY version DESC"
            ))?;
            let versions = stmt
                .query_map(params![secret.id, environment.id], version_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(versions)
        })
    }

    /// Plaintext of the current version, or `None` when the secret is
    /// missing, archived, has no value in this environment or has expired.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown environment and
    /// [`VaultError::DecryptionFailed`] for a value that fails to
    /// authenticate.
    pub fn resolve(
        &self,
        project_id: &str,
        environment_slug: &str,
        key_or_path: &str,
    ) -> Result<Option<String>> {
        let environment = self.environment(project_id, environment_slug)?;
        let Some(secret) = self.find_secret(project_id, key_or_path)? else {
            return Ok(None);
        };
        if secret.archived {
            return Ok(None);
        }
        self.current_value(&secret, &environment)
    }

    /// Plaintext of the current version of `secret` in `environment`.
    pub fn current_value(
        &self,
        secret: &Secret,
        environment: &Environment,
    ) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        let stored = self.db.execute(|conn| {
            Ok(conn
                .query_row(
                    "SELECT ?3, encrypted_value, iv, key_id FROM secret_versions
                     WHERE secret_id = ?1 AND environment_id = ?2 AND current = 1
                       AND (expires_at IS NULL OR expires_at > ?4)",
                    params![secret.id, environment.id, secret.key, now],
                    stored_value_from_row,
                )
                .optional()?)
        })?;

        stored
            .map(|stored| self.decrypt_stored(&secret.project_id, &stored))
            .transpose()
    }

    /// Key to plaintext for every active secret with a live value in the
    /// environment. Secrets without one are left out.
    pub fn resolve_all(
        &self,
        project_id: &str,
        environment_slug: &str,
    ) -> Result<BTreeMap<String, String>> {
        let environment = self.environment(project_id, environment_slug)?;
        let now = Utc::now().timestamp();

        let rows = self.db.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.key, v.encrypted_value, v.iv, v.key_id
                 FROM secrets s
                 JOIN secret_versions v ON v.secret_id = s.id
                 WHERE s.project_id = ?1 AND s.archived = 0
                   AND v.environment_id = ?2 AND v.current = 1
                   AND (v.expires_at IS NULL OR v.expires_at > ?3)
                 ORDER BY s.key",
            )?;
            let rows = stmt
                .query_map(params![project_id, environment.id, now], stored_value_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut values = BTreeMap::new();
        for stored in rows {
            let value = self.decrypt_stored(project_id, &stored)?;
            values.insert(stored.key, value);
        }
        tracing::debug!(
            project_id,
            environment = environment_slug,
            count = values.len(),
            "resolved environment"
        );
        Ok(values)
    }

    /// Replace each `${KEY}` in `template` with that secret's value.
    /// References that do not resolve are left as written.
    pub fn resolve_with_references(
        &self,
        project_id: &str,
        environment_slug: &str,
        template: &str,
    ) -> Result<String> {
        let pattern = Regex::new(REFERENCE_PATTERN)
            .map_err(|e| VaultError::Internal(format!("reference pattern: {e}")))?;
        let names: BTreeSet<&str> = pattern
            .captures_iter(template)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        if names.is_empty() {
            return Ok(template.to_string());
        }

        let environment = self.environment(project_id, environment_slug)?;
        let mut values = BTreeMap::new();
        for name in names {
            let secret = self.db.execute(|conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "SELECT {SECRET_COLUMNS} FROM secrets s
                             WHERE s.project_id = ?1 AND s.key = ?2 AND s.archived = 0"
                        ),
                        params![project_id, name],
                        secret_from_row,
                    )
                    .optional()?)
            })?;
            if let Some(secret) = secret {
                if let Some(value) = self.current_value(&secret, &environment)? {
                    values.insert(name, value);
                }
            }
        }

        let rendered = pattern.replace_all(template, |caps: &regex::Captures<'_>| {
            match caps.get(1).and_then(|m| values.get(m.as_str())) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        });
        Ok(rendered.into_owned())
    }

    /// Active secrets with a rotation interval whose last write is at
    /// least that old at `now`.
    pub fn rotation_due(&self, project_id: &str, now: DateTime<Utc>) -> Result<Vec<Secret>> {
        let candidates = self.db.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SECRET_COLUMNS}, COALESCE(MAX(v.created_at), s.created_at)
                 FROM secrets s
                 LEFT JOIN secret_versions v ON v.secret_id = s.id
                 WHERE s.project_id = ?1 AND s.archived = 0 AND s.rotation_days IS NOT NULL
                 GROUP BY s.id
                 ORDER BY s.key"
            ))?;
            let rows = stmt
                .query_map(params![project_id], |row| {
                    Ok((secret_from_row(row)?, row.get::<_, i64>(11)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(candidates
            .into_iter()
            .filter(|(secret, last_write)| {
                let days = i64::from(secret.rotation_days.unwrap_or(0));
                last_write + days * 86_400 <= now.timestamp()
            })
            .map(|(secret, _)| secret)
            .collect())
    }

    fn decrypt_stored(&self, project_id: &str, stored: &StoredValue) -> Result<String> {
        self.encryptor
            .decrypt_to_string(&stored.encrypted_value, &stored.iv, &stored.key_id, project_id)
            .inspect_err(|err| {
                if err.is_security_event() {
                    tracing::error!(project_id, secret = %stored.key, "secret version failed authentication");
                }
            })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Keys must look like environment variable names (dots and dashes allowed).
pub fn validate_key(key: &str) -> Result<()> {
    let mut chars = key.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(VaultError::validation(format!(
            "invalid secret key {key:?}: use letters, digits, '_', '.' or '-', not starting with a digit"
        )))
    }
}

pub(crate) fn query_secrets(
    conn: &Connection,
    project_id: &str,
    include_archived: bool,
) -> Result<Vec<Secret>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SECRET_COLUMNS} FROM secrets s
         WHERE s.project_id = ?1 AND (?2 OR s.archived = 0)
         ORDER BY s.key"
    ))?;
    let secrets = stmt
        .query_map(params![project_id, include_archived], secret_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(secrets)
}

fn is_constraint_violation<T>(result: &Result<T>) -> bool {
    matches!(
        result,
        Err(VaultError::Database(rusqlite::Error::SqliteFailure(e, _)))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn environment_from_row(row: &Row<'_>) -> rusqlite::Result<Environment> {
    Ok(Environment {
        id: row.get(0)?,
        project_id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
        created_at: from_timestamp(row.get(4)?),
    })
}

fn secret_from_row(row: &Row<'_>) -> rusqlite::Result<Secret> {
    let tags: String = row.get(5)?;
    let tags = serde_json::from_str(&tags).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Secret {
        id: row.get(0)?,
        project_id: row.get(1)?,
        key: row.get(2)?,
        path: row.get(3)?,
        secret_type: row.get(4)?,
        tags,
        description: row.get(6)?,
        rotation_days: row.get(7)?,
        archived: row.get(8)?,
        created_at: from_timestamp(row.get(9)?),
        updated_at: from_timestamp(row.get(10)?),
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<SecretVersion> {
    Ok(SecretVersion {
        id: row.get(0)?,
        secret_id: row.get(1)?,
        environment_id: row.get(2)?,
        version: row.get(3)?,
        key_id: row.get(4)?,
        current: row.get(5)?,
        created_by: row.get(6)?,
        note: row.get(7)?,
        expires_at: row.get::<_, Option<i64>>(8)?.map(from_timestamp),
        created_at: from_timestamp(row.get(9)?),
    })
}

fn stored_value_from_row(row: &Row<'_>) -> rusqlite::Result<StoredValue> {
    Ok(StoredValue {
        key: row.get(0)?,
        encrypted_value: row.get(1)?,
        iv: row.get(2)?,
        key_id: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::config::MasterKey;
    use crate::keys::KeyManager;

    struct Fixture {
        store: SecretStore,
        env: Environment,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let encryptor = Encryptor::new(KeyManager::new(db.clone(), MasterKey::development()));
        let store = SecretStore::new(db, encryptor);
        let env = store.create_environment("proj", "production", "Production").unwrap();
        Fixture { store, env }
    }

    #[test]
    fn versions_increase_and_only_latest_is_current() {
        let Fixture { store, env } = fixture();
        let secret = store.create_secret("proj", NewSecret::new("DB_URL")).unwrap();

        let v1 = store.set_value(&secret, &env, "one", Some("alice"), None).unwrap();
        let v2 = store.set_value(&secret, &env, "two", None, Some("bump")).unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));

        let history = store.history(&secret, &env).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 2);
        assert!(history[0].current);
        assert!(!history[1].current);
        assert_eq!(history[1].created_by.as_deref(), Some("alice"));
        assert_eq!(history[0].note.as_deref(), Some("bump"));

        assert_eq!(
            store.resolve("proj", "production", "DB_URL").unwrap().as_deref(),
            Some("two")
        );
    }

    #[test]
    fn environments_version_independently() {
        let Fixture { store, env } = fixture();
        let staging = store.create_environment("proj", "staging", "").unwrap();
        assert_eq!(staging.name, "staging");
        let secret = store.create_secret("proj", NewSecret::new("API_KEY")).unwrap();

        store.set_value(&secret, &env, "prod-key", None, None).unwrap();
        let staged = store.set_value(&secret, &staging, "staging-key", None, None).unwrap();
        assert_eq!(staged.version, 1);

        assert_eq!(
            store.resolve("proj", "staging", "API_KEY").unwrap().as_deref(),
            Some("staging-key")
        );
        assert_eq!(
            store.resolve("proj", "production", "API_KEY").unwrap().as_deref(),
            Some("prod-key")
        );
    }

    #[test]
    fn resolve_by_path_and_missing_cases() {
        let Fixture { store, env } = fixture();
        let secret = store
            .create_secret("proj", NewSecret::new("REDIS_URL").with_path("cache/redis"))
            .unwrap();
        store.set_value(&secret, &env, "redis://cache", None, None).unwrap();

        assert_eq!(
            store.resolve("proj", "production", "cache/redis").unwrap().as_deref(),
            Some("redis://cache")
        );
        assert_eq!(store.resolve("proj", "production", "NOPE").unwrap(), None);
        assert!(matches!(
            store.resolve("proj", "nowhere", "REDIS_URL"),
            Err(VaultError::NotFound { .. })
        ));
    }

    #[test]
    fn archived_secrets_do_not_resolve() {
        let Fixture { store, env } = fixture();
        let secret = store.create_secret("proj", NewSecret::new("OLD")).unwrap();
        store.set_value(&secret, &env, "v", None, None).unwrap();

        store.archive(&secret).unwrap();
        assert_eq!(store.resolve("proj", "production", "OLD").unwrap(), None);
        assert!(store.resolve_all("proj", "production").unwrap().is_empty());
        assert!(matches!(
            store.set_value(&secret, &env, "w", None, None),
            Err(VaultError::Validation { .. })
        ));
        assert_eq!(store.list_secrets("proj", false).unwrap().len(), 0);
        assert_eq!(store.list_secrets("proj", true).unwrap().len(), 1);

        store.unarchive(&secret).unwrap();
        assert_eq!(
            store.resolve("proj", "production", "OLD").unwrap().as_deref(),
            Some("v")
        );
    }

    #[test]
    fn archived_key_does_not_shadow_live_path() {
        let Fixture { store, env } = fixture();
        let legacy = store.create_secret("proj", NewSecret::new("LEGACY")).unwrap();
        store.set_value(&legacy, &env, "old", None, None).unwrap();
        store.archive(&legacy).unwrap();

        let replacement = store
            .create_secret("proj", NewSecret::new("CURRENT").with_path("LEGACY"))
            .unwrap();
        store.set_value(&replacement, &env, "new", None, None).unwrap();

        let found = store.find_secret("proj", "LEGACY").unwrap().unwrap();
        assert_eq!(found.id, replacement.id);
        assert_eq!(
            store.resolve("proj", "production", "LEGACY").unwrap().as_deref(),
            Some("new")
        );

        store.archive(&replacement).unwrap();
        let found = store.find_secret("proj", "LEGACY").unwrap().unwrap();
        assert_eq!(found.id, legacy.id);
        assert_eq!(store.resolve("proj", "production", "LEGACY").unwrap(), None);
    }

    #[test]
    fn expired_versions_are_inactive() {
        let Fixture { store, env } = fixture();
        let secret = store.create_secret("proj", NewSecret::new("TEMP_TOKEN")).unwrap();
        let options = VersionOptions {
            expires_at: Some(Utc::now() - Duration::hours(1)),
            ..VersionOptions::default()
        };
        store.set_value_with(&secret, &env, "stale", &options).unwrap();

        assert_eq!(store.resolve("proj", "production", "TEMP_TOKEN").unwrap(), None);
        assert!(!store.resolve_all("proj", "production").unwrap().contains_key("TEMP_TOKEN"));
    }

    #[test]
    fn references_substitute_known_keys_only() {
        let Fixture { store, env } = fixture();
        for (key, value) in [("DB_HOST", "db.internal"), ("DB_PORT", "5432")] {
            let secret = store.create_secret("proj", NewSecret::new(key)).unwrap();
            store.set_value(&secret, &env, value, None, None).unwrap();
        }

        let rendered = store
            .resolve_with_references(
                "proj",
                "production",
                "postgres://${DB_HOST}:${DB_PORT}/app?x=${MISSING}&y=${DB_HOST}",
            )
            .unwrap();
        assert_eq!(
            rendered,
            "postgres://db.internal:5432/app?x=${MISSING}&y=db.internal"
        );
        assert_eq!(
            store.resolve_with_references("proj", "production", "no refs").unwrap(),
            "no refs"
        );
    }

    #[test]
    fn rollback_appends_a_new_version() {
        let Fixture { store, env } = fixture();
        let secret = store.create_secret("proj", NewSecret::new("TOKEN")).unwrap();
        store.set_value(&secret, &env, "first", None, None).unwrap();
        store.set_value(&secret, &env, "second", None, None).unwrap();

        let rolled = store.rollback(&secret, &env, 1, Some("ops")).unwrap();
        assert_eq!(rolled.version, 3);
        assert_eq!(rolled.note.as_deref(), Some("rollback to v1"));
        assert_eq!(
            store.resolve("proj", "production", "TOKEN").unwrap().as_deref(),
            Some("first")
        );
        assert!(matches!(
            store.rollback(&secret, &env, 9, None),
            Err(VaultError::NotFound { .. })
        ));
    }

    #[test]
    fn duplicate_keys_and_bad_names_rejected() {
        let Fixture { store, .. } = fixture();
        store.create_secret("proj", NewSecret::new("DUP")).unwrap();
        assert!(matches!(
            store.create_secret("proj", NewSecret::new("DUP")),
            Err(VaultError::Validation { .. })
        ));
        // Same key in another project is fine.
        store.create_secret("other", NewSecret::new("DUP")).unwrap();

        for bad in ["", "1ABC", "HAS SPACE", "A=B"] {
            assert!(validate_key(bad).is_err(), "{bad:?}");
        }
        assert!(matches!(
            store.create_environment("proj", "production", "again"),
            Err(VaultError::Validation { .. })
        ));
        assert!(store.create_environment("proj", "Bad Slug", "").is_err());
    }

    #[test]
    fn cross_project_environment_rejected() {
        let Fixture { store, env } = fixture();
        let secret = store.create_secret("other", NewSecret::new("X")).unwrap();
        assert!(matches!(
            store.set_value(&secret, &env, "v", None, None),
            Err(VaultError::Validation { .. })
        ));
    }

    #[test]
    fn rotation_due_uses_last_write() {
        let Fixture { store, env } = fixture();
        let rotating = store
            .create_secret("proj", NewSecret::new("ROTATE_ME").with_rotation_days(30))
            .unwrap();
        store.create_secret("proj", NewSecret::new("STATIC")).unwrap();
        store.set_value(&rotating, &env, "v", None, None).unwrap();

        let now = Utc::now();
        assert!(store.rotation_due("proj", now).unwrap().is_empty());

        let due = store.rotation_due("proj", now + Duration::days(31)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, "ROTATE_ME");
    }

    #[test]
    fn tags_round_trip_through_storage() {
        let Fixture { store, .. } = fixture();
        store
            .create_secret(
                "proj",
                NewSecret::new("OTP_SEED")
                    .with_type("otp")
                    .with_tag("algorithm", "SHA1")
                    .with_tag("digits", "6"),
            )
            .unwrap();
        let found = store.secret("proj", "OTP_SEED").unwrap();
        assert_eq!(found.secret_type, "otp");
        assert_eq!(found.tags.get("digits").map(String::as_str), Some("6"));
    }
}
