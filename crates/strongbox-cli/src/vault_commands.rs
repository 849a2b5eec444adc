//! `keys`, `env` and `secrets` subcommands.

use anyhow::{Context, Result, bail};
use strongbox_vault::{ExportFormat, ImportFormat, NewSecret, Vault, VaultConfig};

use crate::cli::{EnvAction, KeyAction, SecretAction};
use crate::helpers::{environment_slug, read_input, value_or_stdin};

// ---------------------------------------------------------------------------
// keys
// ---------------------------------------------------------------------------

pub fn keys(vault: &Vault, project: &str, action: KeyAction) -> Result<()> {
    match action {
        KeyAction::List => {
            let keys = vault.keys().list_keys(project)?;
            if keys.is_empty() {
                println!("No keys for project {project}.");
            }
            for key in keys {
                let retired = key
                    .retired_at
                    .map(|t| format!("  retired {}", t.to_rfc3339()))
                    .unwrap_or_default();
                println!(
                    "{}  {:<8}  {}  created {}{retired}",
                    key.key_id,
                    key.status.as_str(),
                    key.key_type,
                    key.created_at.to_rfc3339()
                );
            }
        }
        KeyAction::Rotate => {
            let key = vault.keys().rotate_key(project)?;
            println!("Rotated {project}: new active key {}", key.key_id);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// env
// ---------------------------------------------------------------------------

pub fn env(vault: &Vault, project: &str, action: EnvAction) -> Result<()> {
    match action {
        EnvAction::List => {
            for env in vault.secrets().list_environments(project)? {
                println!("{:<16}  {}", env.slug, env.name);
            }
        }
        EnvAction::Create { slug, name } => {
            let env = vault.secrets().create_environment(
                project,
                &slug,
                name.as_deref().unwrap_or(""),
            )?;
            println!("Created environment {} ({})", env.slug, env.name);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// secrets
// ---------------------------------------------------------------------------

pub fn secrets(
    vault: &Vault,
    config: &VaultConfig,
    project: &str,
    action: SecretAction,
) -> Result<()> {
    let store = vault.secrets();

    match action {
        SecretAction::List { archived } => {
            for secret in store.list_secrets(project, archived)? {
                let flag = if secret.archived { "  (archived)" } else { "" };
                println!("{:<32}  {}{flag}", secret.key, secret.path);
            }
        }

        SecretAction::Set {
            key,
            value,
            env,
            path,
            note,
            user,
        } => {
            let slug = environment_slug(env.env, config);
            let environment = store.environment(project, &slug)?;
            let secret = match store.find_secret(project, &key)? {
                Some(secret) => secret,
                None => {
                    let mut new = NewSecret::new(key.as_str());
                    new.path = path;
                    store.create_secret(project, new)?
                }
            };
            let value = value_or_stdin(value)?;
            let version = store.set_value(
                &secret,
                &environment,
                &value,
                user.as_deref(),
                note.as_deref(),
            )?;
            println!("{} v{} set in {slug}", secret.key, version.version);
        }

        SecretAction::Get { key, env } => {
            let slug = environment_slug(env.env, config);
            match store.resolve(project, &slug, &key)? {
                Some(value) => println!("{value}"),
                None => bail!("{key} has no active value in {slug}"),
            }
        }

        SecretAction::History { key, env } => {
            let slug = environment_slug(env.env, config);
            let environment = store.environment(project, &slug)?;
            let secret = store.secret(project, &key)?;
            for version in store.history(&secret, &environment)? {
                println!(
                    "v{:<4} {}  {}  by {}  key {}{}",
                    version.version,
                    if version.current { "*" } else { " " },
                    version.created_at.to_rfc3339(),
                    version.created_by.as_deref().unwrap_or("-"),
                    version.key_id,
                    version
                        .note
                        .map(|note| format!("  ({note})"))
                        .unwrap_or_default(),
                );
            }
        }

        SecretAction::Rollback {
            key,
            version,
            env,
            user,
        } => {
            let slug = environment_slug(env.env, config);
            let environment = store.environment(project, &slug)?;
            let secret = store.secret(project, &key)?;
            let restored = store.rollback(&secret, &environment, version, user.as_deref())?;
            println!(
                "{} rolled back to v{version} as v{} in {slug}",
                secret.key, restored.version
            );
        }

        SecretAction::Archive { key } => {
            let secret = store.secret(project, &key)?;
            store.archive(&secret)?;
            println!("Archived {}", secret.key);
        }

        SecretAction::Unarchive { key } => {
            let secret = store.secret(project, &key)?;
            store.unarchive(&secret)?;
            println!("Restored {}", secret.key);
        }

        SecretAction::Render { template, env } => {
            let slug = environment_slug(env.env, config);
            let template = value_or_stdin(template)?;
            println!(
                "{}",
                store.resolve_with_references(project, &slug, &template)?
            );
        }

        SecretAction::Export { env, format, name } => {
            let slug = environment_slug(env.env, config);
            let format = ExportFormat::parse(&format)
                .with_context(|| format!("unknown export format {format:?}"))?;
            print!("{}", store.export(project, &slug, format, name.as_deref())?);
        }

        SecretAction::Import {
            file,
            env,
            format,
            user,
        } => {
            let slug = environment_slug(env.env, config);
            let format = match format {
                Some(name) => ImportFormat::parse(&name)
                    .with_context(|| format!("unknown import format {name:?}"))?,
                None if file.extension().is_some_and(|ext| ext == "json") => ImportFormat::Json,
                None => ImportFormat::Dotenv,
            };
            let input = read_input(&file)?;
            let report = store.import(project, &slug, format, &input, user.as_deref())?;

            println!(
                "Imported into {slug}: {} created, {} updated, {} failed",
                report.created.len(),
                report.updated.len(),
                report.failed.len()
            );
            for failure in &report.failed {
                eprintln!("  {}: {}", failure.key, failure.reason);
            }
            if !report.is_clean() {
                bail!("{} entries failed to import", report.failed.len());
            }
        }

        SecretAction::Due => {
            let due = store.rotation_due(project, chrono::Utc::now())?;
            if due.is_empty() {
                println!("No secrets are due for rotation.");
            }
            for secret in due {
                println!(
                    "{:<32}  every {} days",
                    secret.key,
                    secret.rotation_days.unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
