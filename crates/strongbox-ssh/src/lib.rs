//! SSH key engine for Strongbox.
//!
//! Generates and imports RSA and Ed25519 key pairs, encodes public keys in
//! the SSH wire format, reads and writes the OpenSSH v1 private-key
//! container and computes `SHA256:` fingerprints. Key pairs are value
//! objects; nothing here touches storage.
//!
//! # Modules
//!
//! - [`wire`]: RFC 4251 `uint32`/`string`/`mpint` codec.
//! - [`keys`]: key types, public-key blobs and lines, fingerprints.
//! - [`openssh`]: `openssh-key-v1` container encoder and decoder.
//! - [`generator`]: fresh key pairs.
//! - [`importer`]: format sniffing and parsing of existing private keys.
//!
//! # Quick Start
//!
//! ```rust
//! use strongbox_ssh::{KeyType, fingerprint, generate, import};
//!
//! # fn example() -> strongbox_ssh::Result<()> {
//! let pair = generate(KeyType::Ed25519, Some("deploy@ci"))?;
//! assert_eq!(fingerprint(&pair.public_key)?, pair.fingerprint);
//!
//! let again = import(&pair.private_key)?;
//! assert_eq!(again.fingerprint, pair.fingerprint);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod error;
pub mod generator;
pub mod importer;
pub mod keys;
pub mod openssh;
pub mod wire;

pub use error::{Result, SshError};
pub use generator::generate;
pub use importer::import;
pub use keys::{KeyType, PublicKey, SshKeyPair, fingerprint, parse_public_key_line};
pub use openssh::OpenSshKey;
