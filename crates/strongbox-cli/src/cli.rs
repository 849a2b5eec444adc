//! CLI argument definitions for Strongbox.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Strongbox -- multi-tenant secrets vault.
#[derive(Parser)]
#[command(
    name = "strongbox",
    version,
    about = "Strongbox -- envelope-encrypted secrets, OTP and SSH keys",
    long_about = "Manage versioned, per-environment secrets encrypted under per-project \
                  data keys, generate and verify one-time passwords, and create or inspect \
                  SSH keys."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, env = "STRONGBOX_CONFIG", default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage project data keys.
    Keys {
        #[command(flatten)]
        project: ProjectArgs,
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Manage environments.
    Env {
        #[command(flatten)]
        project: ProjectArgs,
        #[command(subcommand)]
        action: EnvAction,
    },

    /// Store, read, import and export secrets.
    Secrets {
        #[command(flatten)]
        project: ProjectArgs,
        #[command(subcommand)]
        action: SecretAction,
    },

    /// One-time passwords (TOTP/HOTP).
    Otp {
        #[command(subcommand)]
        action: OtpAction,
    },

    /// SSH key generation and inspection.
    Ssh {
        #[command(subcommand)]
        action: SshAction,
    },
}

#[derive(Args)]
pub struct ProjectArgs {
    /// Project the command operates on.
    #[arg(long, short, env = "STRONGBOX_PROJECT", default_value = "default")]
    pub project: String,
}

#[derive(Args)]
pub struct EnvironmentArg {
    /// Environment slug. Defaults to `default_environment` from the config.
    #[arg(long, short)]
    pub env: Option<String>,
}

/// Actions for project data keys.
#[derive(Subcommand)]
pub enum KeyAction {
    /// List every key of the project, newest first.
    List,
    /// Create a new active key and retire the current one.
    Rotate,
}

/// Actions for environments.
#[derive(Subcommand)]
pub enum EnvAction {
    /// List environments.
    List,
    /// Create an environment.
    Create {
        /// Slug, e.g. `production`.
        slug: String,
        /// Display name. Defaults to the slug.
        #[arg(long, short)]
        name: Option<String>,
    },
}

/// Actions for secrets.
#[derive(Subcommand)]
pub enum SecretAction {
    /// List secrets.
    List {
        /// Include archived secrets.
        #[arg(long)]
        archived: bool,
    },
    /// Write a new version, creating the secret if needed.
    Set {
        /// Secret key, e.g. `DATABASE_URL`.
        key: String,
        /// The value. Read from stdin when omitted.
        value: Option<String>,
        #[command(flatten)]
        env: EnvironmentArg,
        /// Path for a newly created secret. Defaults to the key.
        #[arg(long)]
        path: Option<String>,
        /// Note stored with the version.
        #[arg(long)]
        note: Option<String>,
        /// Author recorded with the version.
        #[arg(long, env = "USER")]
        user: Option<String>,
    },
    /// Print the current value.
    Get {
        /// Secret key or path.
        key: String,
        #[command(flatten)]
        env: EnvironmentArg,
    },
    /// Show version metadata, newest first.
    History {
        key: String,
        #[command(flatten)]
        env: EnvironmentArg,
    },
    /// Make an earlier version current again.
    Rollback {
        key: String,
        /// Version number to restore.
        version: u32,
        #[command(flatten)]
        env: EnvironmentArg,
        #[arg(long, env = "USER")]
        user: Option<String>,
    },
    /// Archive (soft-delete) a secret.
    Archive { key: String },
    /// Restore an archived secret.
    Unarchive { key: String },
    /// Substitute `${KEY}` references in a template.
    Render {
        /// Template text. Read from stdin when omitted.
        template: Option<String>,
        #[command(flatten)]
        env: EnvironmentArg,
    },
    /// Export the environment.
    Export {
        #[command(flatten)]
        env: EnvironmentArg,
        /// dotenv, shell, json, k8s or yaml.
        #[arg(long, short, default_value = "dotenv")]
        format: String,
        /// Kubernetes secret name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Import dotenv or JSON.
    Import {
        /// Input file, or `-` for stdin.
        file: PathBuf,
        #[command(flatten)]
        env: EnvironmentArg,
        /// dotenv or json. Guessed from the file extension when omitted.
        #[arg(long, short)]
        format: Option<String>,
        #[arg(long, env = "USER")]
        user: Option<String>,
    },
    /// List secrets whose rotation interval has elapsed.
    Due,
}

#[derive(Args)]
pub struct OtpParamArgs {
    /// SHA1, SHA256 or SHA512.
    #[arg(long, default_value = "SHA1")]
    pub algorithm: String,
    #[arg(long, default_value_t = 6)]
    pub digits: u32,
    /// TOTP period in seconds.
    #[arg(long, default_value_t = 30)]
    pub period: u64,
}

/// Actions for one-time passwords.
#[derive(Subcommand)]
pub enum OtpAction {
    /// Generate a new random base32 secret.
    Secret,
    /// Print the current TOTP code, or the HOTP code with --counter.
    Generate {
        secret: String,
        #[arg(long)]
        counter: Option<u64>,
        #[command(flatten)]
        params: OtpParamArgs,
    },
    /// Check a code. TOTP unless --counter is given.
    Verify {
        secret: String,
        code: String,
        /// HOTP counter to start scanning from.
        #[arg(long)]
        counter: Option<u64>,
        /// TOTP drift window in periods.
        #[arg(long, default_value_t = strongbox_otp::DEFAULT_DRIFT_WINDOW)]
        window: u32,
        /// HOTP look-ahead.
        #[arg(long, default_value_t = strongbox_otp::DEFAULT_LOOKAHEAD)]
        lookahead: u64,
        #[command(flatten)]
        params: OtpParamArgs,
    },
    /// Build an otpauth:// provisioning URI, or parse one with --parse.
    Uri {
        /// Base32 secret, or the URI itself with --parse.
        secret: String,
        /// Account label, e.g. an email address.
        #[arg(long, default_value = "")]
        account: String,
        #[arg(long)]
        issuer: Option<String>,
        /// Build an HOTP URI starting at this counter.
        #[arg(long)]
        counter: Option<u64>,
        /// Parse and print the given URI instead.
        #[arg(long)]
        parse: bool,
        #[command(flatten)]
        params: OtpParamArgs,
    },
}

/// Actions for SSH keys.
#[derive(Subcommand)]
pub enum SshAction {
    /// Generate a key pair.
    Keygen {
        /// rsa-2048, rsa-4096 or ed25519.
        #[arg(long, short = 't', default_value = "ed25519")]
        key_type: String,
        #[arg(long, short = 'C')]
        comment: Option<String>,
        /// Write the private key here and the public key to `<path>.pub`.
        /// Prints both when omitted.
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Inspect a private key file.
    Import {
        /// Private key file, or `-` for stdin.
        file: PathBuf,
    },
    /// Fingerprint a public key line or `.pub` file.
    Fingerprint {
        /// Public key line, or a path to a file containing one.
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_subcommands() {
        let cli = Cli::try_parse_from([
            "strongbox", "secrets", "--project", "acme", "set", "API_KEY", "v", "--env", "prod",
        ])
        .unwrap();
        let Commands::Secrets { project, action } = cli.command else {
            panic!("expected secrets command");
        };
        assert_eq!(project.project, "acme");
        assert!(matches!(
            action,
            SecretAction::Set { ref key, ref value, ref env, .. }
                if key == "API_KEY" && value.as_deref() == Some("v") && env.env.as_deref() == Some("prod")
        ));
    }

    #[test]
    fn otp_defaults() {
        let cli = Cli::try_parse_from(["strongbox", "otp", "verify", "JBSWY3DPEHPK3PXP", "123456"])
            .unwrap();
        let Commands::Otp {
            action: OtpAction::Verify { window, lookahead, params, counter, .. },
        } = cli.command
        else {
            panic!("expected otp verify");
        };
        assert_eq!((window, lookahead, counter), (1, 10, None));
        assert_eq!((params.algorithm.as_str(), params.digits, params.period), ("SHA1", 6, 30));
    }
}
