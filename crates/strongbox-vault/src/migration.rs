//! Schema migrations.
//!
//! Migrations are static SQL keyed by version number. Applied versions are
//! recorded in `_migrations`, so running them again is a no-op.

use rusqlite::{Connection, params};

use crate::error::Result;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Append new ones at the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "envelope encryption keys",
        sql: r#"
            CREATE TABLE encryption_keys (
                key_id        TEXT PRIMARY KEY,
                project_id    TEXT NOT NULL,
                status        TEXT NOT NULL CHECK(status IN ('active','rotating','retired')),
                encrypted_key BLOB NOT NULL,
                iv            BLOB NOT NULL,
                key_type      TEXT NOT NULL,
                created_at    INTEGER NOT NULL,
                retired_at    INTEGER
            );
            CREATE INDEX idx_keys_project ON encryption_keys(project_id);
            -- At most one active key per project, whoever is writing.
            CREATE UNIQUE INDEX idx_keys_one_active
                ON encryption_keys(project_id) WHERE status = 'active';
        "#,
    },
    Migration {
        version: 2,
        description: "environments, secrets and secret versions",
        sql: r#"
            CREATE TABLE environments (
                id         TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                slug       TEXT NOT NULL,
                name       TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(project_id, slug)
            );

            CREATE TABLE secrets (
                id            TEXT PRIMARY KEY,
                project_id    TEXT NOT NULL,
                key           TEXT NOT NULL,
                path          TEXT NOT NULL,
                secret_type   TEXT NOT NULL,
                tags          TEXT NOT NULL DEFAULT '{}',
                description   TEXT,
                rotation_days INTEGER,
                archived      INTEGER NOT NULL DEFAULT 0,
                created_at    INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL,
                UNIQUE(project_id, key)
            );
            CREATE INDEX idx_secrets_path ON secrets(project_id, path);

            CREATE TABLE secret_versions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                secret_id       TEXT NOT NULL REFERENCES secrets(id),
                environment_id  TEXT NOT NULL REFERENCES environments(id),
                version         INTEGER NOT NULL CHECK(version > 0),
                encrypted_value BLOB NOT NULL,
                iv              BLOB NOT NULL,
                key_id          TEXT NOT NULL REFERENCES encryption_keys(key_id),
                current         INTEGER NOT NULL DEFAULT 0,
                created_by      TEXT,
                note            TEXT,
                expires_at      INTEGER,
                created_at      INTEGER NOT NULL,
                UNIQUE(secret_id, environment_id, version)
            );
            -- Exactly one current version per secret and environment.
            CREATE UNIQUE INDEX idx_versions_one_current
                ON secret_versions(secret_id, environment_id) WHERE current = 1;
        "#,
    },
    Migration {
        version: 3,
        description: "access policies",
        sql: r#"
            CREATE TABLE access_policies (
                id             TEXT PRIMARY KEY,
                project_id     TEXT NOT NULL,
                name           TEXT NOT NULL,
                principal_type TEXT NOT NULL CHECK(principal_type IN ('token','user','service_account')),
                principal_id   TEXT NOT NULL,
                permissions    TEXT NOT NULL,
                environments   TEXT NOT NULL DEFAULT '[]',
                paths          TEXT NOT NULL DEFAULT '[]',
                conditions     TEXT,
                enabled        INTEGER NOT NULL DEFAULT 1,
                created_at     INTEGER NOT NULL
            );
            CREATE INDEX idx_policies_principal
                ON access_policies(principal_type, principal_id);
        "#,
    },
    Migration {
        version: 4,
        description: "hotp counters",
        sql: r#"
            CREATE TABLE otp_counters (
                credential_id TEXT PRIMARY KEY,
                counter       INTEGER NOT NULL CHECK(counter >= 0),
                updated_at    INTEGER NOT NULL
            );
        "#,
    },
];

/// Apply every migration newer than the recorded version.
pub fn run_all(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        tracing::debug!(current_version = current, "vault schema is up to date");
        return Ok(());
    }

    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied migration version, or 0.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<()> {
    tracing::info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    let tx = conn.transaction()?;
    if let Err(err) = tx.execute_batch(migration.sql) {
        tracing::error!(version = migration.version, %err, "migration failed, rolling back");
        return Err(err.into());
    }
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        params![
            migration.version,
            migration.description,
            chrono::Utc::now().timestamp()
        ],
    )?;
    tx.commit()?;
    Ok(())
}
