//! Bulk import and export of resolved secrets.
//!
//! Import accepts dotenv text or a JSON object. Every entry is written
//! independently: a bad line or a failed write is recorded in the
//! [`ImportReport`] and the rest of the batch carries on.
//!
//! Export renders a resolved environment as dotenv, a POSIX shell script,
//! JSON, a Kubernetes `Secret` manifest or YAML.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::secrets::{NewSecret, SecretStore, validate_key};

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportFormat {
    Dotenv,
    Json,
}

impl ImportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dotenv => "dotenv",
            Self::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dotenv" | "env" => Some(Self::Dotenv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Dotenv,
    Shell,
    Json,
    Kubernetes,
    Yaml,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dotenv => "dotenv",
            Self::Shell => "shell",
            Self::Json => "json",
            Self::Kubernetes => "k8s",
            Self::Yaml => "yaml",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dotenv" | "env" => Some(Self::Dotenv),
            "shell" | "sh" => Some(Self::Shell),
            "json" => Some(Self::Json),
            "k8s" | "kubernetes" => Some(Self::Kubernetes),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// One entry that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    /// The secret key, or `line N` when the line had no usable key.
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Keys whose secret did not exist before the import.
    pub created: Vec<String>,
    /// Keys that received a new version of an existing secret.
    pub updated: Vec<String>,
    pub failed: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Entries parsed from an import source, plus the lines that failed.
#[derive(Debug, Default)]
pub struct ParsedInput {
    pub entries: Vec<(String, String)>,
    pub failures: Vec<ImportFailure>,
}

/// Parse dotenv text.
///
/// Supports `NAME=value`, an optional `export ` prefix, `#` comment lines,
/// blank lines, double-quoted values with `\n`, `\r`, `\t`, `\"` and `\\`
/// escapes, single-quoted literal values and ` #` comments after unquoted
/// values.
pub fn parse_dotenv(input: &str) -> ParsedInput {
    let mut parsed = ParsedInput::default();

    for (index, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line
            .strip_prefix("export ")
            .map(str::trim_start)
            .unwrap_or(line);

        let Some((name, value)) = line.split_once('=') else {
            parsed.failures.push(ImportFailure {
                key: format!("line {}", index + 1),
                reason: "expected NAME=value".into(),
            });
            continue;
        };
        let name = name.trim();
        if let Err(err) = validate_key(name) {
            parsed.failures.push(ImportFailure {
                key: format!("line {}", index + 1),
                reason: err.to_string(),
            });
            continue;
        }

        match parse_dotenv_value(value.trim_start()) {
            Ok(value) => parsed.entries.push((name.to_string(), value)),
            Err(reason) => parsed.failures.push(ImportFailure {
                key: name.to_string(),
                reason,
            }),
        }
    }
    parsed
}

fn parse_dotenv_value(raw: &str) -> std::result::Result<String, String> {
    if let Some(body) = raw.strip_prefix('"') {
        let mut value = String::with_capacity(body.len());
        let mut chars = body.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    ensure_trailing_comment(&body[i + 1..])?;
                    return Ok(value);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                },
                _ => value.push(c),
            }
        }
        return Err("unterminated double quote".into());
    }

    if let Some(body) = raw.strip_prefix('\'') {
        let Some(end) = body.find('\'') else {
            return Err("unterminated single quote".into());
        };
        ensure_trailing_comment(&body[end + 1..])?;
        return Ok(body[..end].to_string());
    }

    // Unquoted: a `#` preceded by whitespace starts a comment.
    let mut end = raw.len();
    let bytes = raw.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            end = i;
            break;
        }
    }
    Ok(raw[..end].trim_end().to_string())
}

fn ensure_trailing_comment(rest: &str) -> std::result::Result<(), String> {
    let rest = rest.trim_start();
    if rest.is_empty() || rest.starts_with('#') {
        Ok(())
    } else {
        Err(format!("unexpected text after closing quote: {rest:?}"))
    }
}

/// Parse a JSON object of `key: value`. Scalars are stringified, nested
/// values are kept as compact JSON and `null` is rejected per key.
///
/// # Errors
///
/// [`VaultError::Validation`] if the input is not a JSON object.
pub fn parse_json(input: &str) -> Result<ParsedInput> {
    let value: serde_json::Value = serde_json::from_str(input)
        .map_err(|e| VaultError::validation(format!("import is not valid json: {e}")))?;
    let serde_json::Value::Object(map) = value else {
        return Err(VaultError::validation("json import must be an object"));
    };

    let mut parsed = ParsedInput::default();
    for (key, value) in map {
        if let Err(err) = validate_key(&key) {
            parsed.failures.push(ImportFailure {
                key,
                reason: err.to_string(),
            });
            continue;
        }
        let value = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => {
                parsed.failures.push(ImportFailure {
                    key,
                    reason: "null value".into(),
                });
                continue;
            }
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => value.to_string(),
            nested => serde_json::to_string(&nested)?,
        };
        parsed.entries.push((key, value));
    }
    Ok(parsed)
}

impl SecretStore {
    /// Import entries into `environment_slug`, creating missing secrets.
    ///
    /// # Errors
    ///
    /// Only whole-batch problems fail the call: an unknown environment or a
    /// JSON document that is not an object. Per-entry problems land in
    /// [`ImportReport::failed`].
    pub fn import(
        &self,
        project_id: &str,
        environment_slug: &str,
        format: ImportFormat,
        input: &str,
        user: Option<&str>,
    ) -> Result<ImportReport> {
        let environment = self.environment(project_id, environment_slug)?;
        let parsed = match format {
            ImportFormat::Dotenv => parse_dotenv(input),
            ImportFormat::Json => parse_json(input)?,
        };

        let mut report = ImportReport {
            failed: parsed.failures,
            ..ImportReport::default()
        };
        let note = format!("import ({format})");

        for (key, value) in parsed.entries {
            let outcome = (|| -> Result<bool> {
                let (secret, created) = match self.find_secret(project_id, &key)? {
                    Some(secret) => (secret, false),
                    None => (self.create_secret(project_id, NewSecret::new(key.as_str()))?, true),
                };
                self.set_value(&secret, &environment, &value, user, Some(&note))?;
                Ok(created)
            })();

            match outcome {
                Ok(true) => report.created.push(key),
                Ok(false) => report.updated.push(key),
                Err(err) => {
                    tracing::debug!(project_id, secret = %key, %err, "import entry failed");
                    report.failed.push(ImportFailure {
                        key,
                        reason: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            project_id,
            environment = environment_slug,
            format = %format,
            created = report.created.len(),
            updated = report.updated.len(),
            failed = report.failed.len(),
            "imported secrets"
        );
        Ok(report)
    }

    /// Resolve the environment and render it. `manifest_name` names the
    /// Kubernetes secret and defaults to `<environment>-secrets`.
    pub fn export(
        &self,
        project_id: &str,
        environment_slug: &str,
        format: ExportFormat,
        manifest_name: Option<&str>,
    ) -> Result<String> {
        let values = self.resolve_all(project_id, environment_slug)?;
        let default_name = format!("{environment_slug}-secrets");
        tracing::info!(
            project_id,
            environment = environment_slug,
            format = %format,
            count = values.len(),
            "exporting secrets"
        );
        render(&values, format, manifest_name.unwrap_or(&default_name))
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Render resolved values in `format`.
pub fn render(
    values: &BTreeMap<String, String>,
    format: ExportFormat,
    manifest_name: &str,
) -> Result<String> {
    match format {
        ExportFormat::Dotenv => Ok(render_dotenv(values)),
        ExportFormat::Shell => Ok(render_shell(values)),
        ExportFormat::Json => Ok(serde_json::to_string_pretty(values)?),
        ExportFormat::Kubernetes => render_kubernetes(values, manifest_name),
        ExportFormat::Yaml => serde_yaml::to_string(values)
            .map_err(|e| VaultError::Internal(format!("yaml rendering failed: {e}"))),
    }
}

pub fn render_dotenv(values: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in values {
        out.push_str(key);
        out.push('=');
        out.push_str(&dotenv_quote(value));
        out.push('\n');
    }
    out
}

pub fn render_shell(values: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in values {
        out.push_str("export ");
        out.push_str(key);
        out.push('=');
        out.push_str(&shell_quote(value));
        out.push('\n');
    }
    out
}

pub fn render_kubernetes(values: &BTreeMap<String, String>, name: &str) -> Result<String> {
    let data: serde_json::Map<String, serde_json::Value> = values
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(STANDARD.encode(v))))
        .collect();
    let manifest = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name },
        "type": "Opaque",
        "data": data,
    });
    Ok(serde_json::to_string_pretty(&manifest)?)
}

/// Double-quote `value` if dotenv would misread it bare.
fn dotenv_quote(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '$' | '\\'));
    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Single-quote `value` unless every character is shell-safe.
fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+,=".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
