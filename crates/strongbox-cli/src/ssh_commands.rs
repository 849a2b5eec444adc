//! `ssh` subcommands.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use strongbox_ssh::{KeyType, SshKeyPair};

use crate::cli::SshAction;
use crate::helpers::read_input;

pub fn ssh(action: SshAction) -> Result<()> {
    match action {
        SshAction::Keygen {
            key_type,
            comment,
            out,
        } => {
            let key_type = KeyType::parse(&key_type)?;
            let pair = strongbox_ssh::generate(key_type, comment.as_deref())?;
            match out {
                Some(path) => {
                    write_private_key(&path, &pair)?;
                    let pub_path = path.with_extension(match path.extension() {
                        Some(ext) => format!("{}.pub", ext.to_string_lossy()),
                        None => "pub".to_string(),
                    });
                    std::fs::write(&pub_path, format!("{}\n", pair.public_key))
                        .with_context(|| format!("failed to write {}", pub_path.display()))?;
                    println!("Wrote {} and {}", path.display(), pub_path.display());
                    print_summary(&pair);
                }
                None => {
                    print!("{}", pair.private_key.as_str());
                    println!("{}", pair.public_key);
                    print_summary(&pair);
                }
            }
        }

        SshAction::Import { file } => {
            let text = read_input(&file)?;
            let pair = strongbox_ssh::import(&text)?;
            println!("{}", pair.public_key);
            print_summary(&pair);
        }

        SshAction::Fingerprint { key } => {
            let line = if Path::new(&key).is_file() {
                std::fs::read_to_string(&key)
                    .with_context(|| format!("failed to read {key}"))?
            } else {
                key
            };
            let Some(line) = line.lines().map(str::trim).find(|l| !l.is_empty()) else {
                bail!("no public key found");
            };
            println!("{}", strongbox_ssh::fingerprint(line)?);
        }
    }
    Ok(())
}

fn print_summary(pair: &SshKeyPair) {
    println!(
        "{} {} bits  {}  {}",
        pair.key_type,
        pair.bits,
        pair.fingerprint,
        pair.comment.as_deref().unwrap_or("(no comment)")
    );
}

/// Write the private key readable by the owner only.
fn write_private_key(path: &Path, pair: &SshKeyPair) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(pair.private_key.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
