//! Policy-based access checks.
//!
//! A principal may perform a permission on a secret in an environment when
//! any enabled policy of that principal, in the secret's project, grants
//! it:
//!
//! 1. the policy lists no environments, or lists the environment's slug;
//! 2. the policy lists no paths, or one of its globs matches the secret
//!    path (shell-style: `*`, `?`, `[...]`);
//! 3. the permission is in the policy's permission set. Membership is
//!    exact, so `admin` does not imply `read`.
//!
//! Only token principals have policies. Users and service accounts resolve
//! to an empty policy set and are denied everything until an identity
//! bridge maps them onto tokens.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{Result, VaultError};
use crate::keys::from_timestamp;
use crate::secrets::{Environment, Secret, query_secrets};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Principal {
    Token(String),
    User(String),
    ServiceAccount(String),
}

impl Principal {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::User(_) => "user",
            Self::ServiceAccount(_) => "service_account",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Token(id) | Self::User(id) | Self::ServiceAccount(id) => id,
        }
    }

    fn from_parts(kind: &str, id: String) -> Option<Self> {
        match kind {
            "token" => Some(Self::Token(id)),
            "user" => Some(Self::User(id)),
            "service_account" => Some(Self::ServiceAccount(id)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Delete,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "delete" => Some(Self::Delete),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored access rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub principal: Principal,
    pub permissions: BTreeSet<Permission>,
    /// Environment slugs. Empty means every environment.
    pub environments: BTreeSet<String>,
    /// Path globs. Empty means every path.
    pub paths: Vec<String>,
    /// Stored as given; not evaluated by [`AccessChecker`].
    pub conditions: Option<serde_json::Value>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl AccessPolicy {
    /// Whether this policy alone grants `permission` on `secret` in
    /// `environment`.
    pub fn grants(&self, secret: &Secret, environment: &Environment, permission: Permission) -> bool {
        self.enabled
            && self.project_id == secret.project_id
            && self.project_id == environment.project_id
            && self.permissions.contains(&permission)
            && self.covers_environment(&environment.slug)
            && self.covers_path(&secret.path)
    }

    pub fn covers_environment(&self, slug: &str) -> bool {
        self.environments.is_empty() || self.environments.contains(slug)
    }

    pub fn covers_path(&self, path: &str) -> bool {
        self.paths.is_empty() || self.paths.iter().any(|glob| glob_matches(glob, path))
    }
}

/// Input for [`AccessChecker::create_policy`].
#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub name: String,
    pub principal: Principal,
    pub permissions: BTreeSet<Permission>,
    pub environments: BTreeSet<String>,
    pub paths: Vec<String>,
    pub conditions: Option<serde_json::Value>,
}

impl NewPolicy {
    pub fn new(
        name: impl Into<String>,
        principal: Principal,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            name: name.into(),
            principal,
            permissions: permissions.into_iter().collect(),
            environments: BTreeSet::new(),
            paths: Vec::new(),
            conditions: None,
        }
    }

    pub fn in_environments<S: Into<String>>(mut self, slugs: impl IntoIterator<Item = S>) -> Self {
        self.environments = slugs.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_paths<S: Into<String>>(mut self, globs: impl IntoIterator<Item = S>) -> Self {
        self.paths = globs.into_iter().map(Into::into).collect();
        self
    }
}

const POLICY_COLUMNS: &str = "id, project_id, name, principal_type, principal_id, permissions, \
     environments, paths, conditions, enabled, created_at";

fn glob_matches(glob: &str, path: &str) -> bool {
    match glob::Pattern::new(glob) {
        Ok(pattern) => pattern.matches(path),
        Err(err) => {
            tracing::warn!(glob, %err, "ignoring invalid policy path pattern");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

/// Evaluates access policies stored in the vault database.
#[derive(Clone)]
pub struct AccessChecker {
    db: Database,
}

impl AccessChecker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enabled policies for `principal`. Non-token principals always get an
    /// empty set.
    pub fn policies_for(&self, principal: &Principal) -> Result<Vec<AccessPolicy>> {
        let Principal::Token(token_id) = principal else {
            tracing::debug!(principal = %principal, "principal kind has no policies");
            return Ok(Vec::new());
        };

        self.db.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POLICY_COLUMNS} FROM access_policies
                 WHERE principal_type = 'token' AND principal_id = ?1 AND enabled = 1
                 ORDER BY created_at, id"
            ))?;
            let policies = stmt
                .query_map(params![token_id], policy_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(policies)
        })
    }

    pub fn can_access(
        &self,
        principal: &Principal,
        secret: &Secret,
        environment: &Environment,
        permission: Permission,
    ) -> Result<bool> {
        let policies = self.policies_for(principal)?;
        let allowed = policies
            .iter()
            .any(|policy| policy.grants(secret, environment, permission));
        if !allowed {
            tracing::debug!(
                principal = %principal,
                secret = %secret.key,
                environment = %environment.slug,
                permission = %permission,
                "access denied"
            );
        }
        Ok(allowed)
    }

    /// Active secrets of the environment's project that `principal` may
    /// access with `permission`.
    pub fn allowed_secrets(
        &self,
        principal: &Principal,
        environment: &Environment,
        permission: Permission,
    ) -> Result<Vec<Secret>> {
        let policies = self.policies_for(principal)?;
        if policies.is_empty() {
            return Ok(Vec::new());
        }

        let secrets = self
            .db
            .execute(|conn| query_secrets(conn, &environment.project_id, false))?;
        Ok(secrets
            .into_iter()
            .filter(|secret| {
                policies
                    .iter()
                    .any(|policy| policy.grants(secret, environment, permission))
            })
            .collect())
    }

    // -- Administration -----------------------------------------------------

    pub fn create_policy(&self, project_id: &str, new: NewPolicy) -> Result<AccessPolicy> {
        if new.permissions.is_empty() {
            return Err(VaultError::validation("a policy needs at least one permission"));
        }
        for glob in &new.paths {
            glob::Pattern::new(glob).map_err(|e| {
                VaultError::validation(format!("invalid path pattern {glob:?}: {e}"))
            })?;
        }

        let policy = AccessPolicy {
            id: uuid::Uuid::now_v7().to_string(),
            project_id: project_id.to_string(),
            name: new.name,
            principal: new.principal,
            permissions: new.permissions,
            environments: new.environments,
            paths: new.paths,
            conditions: new.conditions,
            enabled: true,
            created_at: from_timestamp(Utc::now().timestamp()),
        };
        let permissions = serde_json::to_string(&policy.permissions)?;
        let environments = serde_json::to_string(&policy.environments)?;
        let paths = serde_json::to_string(&policy.paths)?;
        let conditions = policy
            .conditions
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.execute(|conn| {
            conn.execute(
                "INSERT INTO access_policies (id, project_id, name, principal_type, principal_id,
                     permissions, environments, paths, conditions, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)",
                params![
                    policy.id,
                    policy.project_id,
                    policy.name,
                    policy.principal.kind(),
                    policy.principal.id(),
                    permissions,
                    environments,
                    paths,
                    conditions,
                    policy.created_at.timestamp()
                ],
            )?;
            Ok(())
        })?;

        tracing::info!(
            project_id,
            policy_id = %policy.id,
            principal = %policy.principal,
            "created access policy"
        );
        Ok(policy)
    }

    pub fn set_policy_enabled(&self, policy_id: &str, enabled: bool) -> Result<()> {
        let changed = self.db.execute(|conn| {
            Ok(conn.execute(
                "UPDATE access_policies SET enabled = ?2 WHERE id = ?1",
                params![policy_id, enabled],
            )?)
        })?;
        if changed == 0 {
            return Err(VaultError::not_found("access policy", policy_id));
        }
        tracing::info!(policy_id, enabled, "changed access policy state");
        Ok(())
    }

    pub fn policy(&self, policy_id: &str) -> Result<AccessPolicy> {
        self.db
            .execute(|conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {POLICY_COLUMNS} FROM access_policies WHERE id = ?1"),
                        params![policy_id],
                        policy_from_row,
                    )
                    .optional()?)
            })?
            .ok_or_else(|| VaultError::not_found("access policy", policy_id))
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn policy_from_row(row: &Row<'_>) -> rusqlite::Result<AccessPolicy> {
    let kind: String = row.get(3)?;
    let principal = Principal::from_parts(&kind, row.get(4)?).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown principal type: {kind}").into(),
        )
    })?;
    let conditions = match row.get::<_, Option<String>>(8)? {
        Some(_) => Some(json_column(row, 8)?),
        None => None,
    };

    Ok(AccessPolicy {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        principal,
        permissions: json_column(row, 5)?,
        environments: json_column(row, 6)?,
        paths: json_column(row, 7)?,
        conditions,
        enabled: row.get(9)?,
        created_at: from_timestamp(row.get(10)?),
    })
}
