//! Key types, public-key blobs and fingerprints.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use ring::digest;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, SshError};
use crate::wire::{WireReader, WireWriter};

pub const SSH_RSA: &str = "ssh-rsa";
pub const SSH_ED25519: &str = "ssh-ed25519";

/// Length of an Ed25519 public key.
pub const ED25519_PUBLIC_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Key type
// ---------------------------------------------------------------------------

/// The key flavours Strongbox generates and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "rsa-2048")]
    Rsa2048,
    #[serde(rename = "rsa-4096")]
    Rsa4096,
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa2048 => "rsa-2048",
            Self::Rsa4096 => "rsa-4096",
            Self::Ed25519 => "ed25519",
        }
    }

    /// Parse a key type name.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Validation`] for anything other than `rsa-2048`,
    /// `rsa-4096` or `ed25519`.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "rsa-2048" => Ok(Self::Rsa2048),
            "rsa-4096" => Ok(Self::Rsa4096),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(SshError::Validation {
                reason: format!(
                    "unsupported key type {other:?}, expected rsa-2048, rsa-4096 or ed25519"
                ),
            }),
        }
    }

    /// Nominal key size in bits.
    pub fn bits(&self) -> u32 {
        match self {
            Self::Rsa2048 => 2048,
            Self::Rsa4096 => 4096,
            Self::Ed25519 => 256,
        }
    }

    /// Algorithm name used in public-key lines and blobs.
    pub fn ssh_name(&self) -> &'static str {
        match self {
            Self::Rsa2048 | Self::Rsa4096 => SSH_RSA,
            Self::Ed25519 => SSH_ED25519,
        }
    }

    /// Bucket an RSA modulus size: up to 2048 bits is `rsa-2048`, anything
    /// larger is `rsa-4096`.
    pub fn for_rsa_bits(bits: u32) -> Self {
        if bits <= 2048 {
            Self::Rsa2048
        } else {
            Self::Rsa4096
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyType {
    type Err = SshError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Public key
// ---------------------------------------------------------------------------

/// Public half of a key, in the form the wire blob carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    /// Unsigned big-endian exponent and modulus.
    Rsa { e: Vec<u8>, n: Vec<u8> },
    Ed25519([u8; ED25519_PUBLIC_LEN]),
}

impl PublicKey {
    pub fn ssh_name(&self) -> &'static str {
        match self {
            Self::Rsa { .. } => SSH_RSA,
            Self::Ed25519(_) => SSH_ED25519,
        }
    }

    /// Public-key blob: the type string followed by the algorithm fields.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_str(self.ssh_name());
        match self {
            Self::Rsa { e, n } => {
                w.put_mpint(e).put_mpint(n);
            }
            Self::Ed25519(point) => {
                w.put_string(point);
            }
        }
        w.into_bytes()
    }

    /// Decode a public-key blob.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(blob);
        let key = Self::read(&mut r)?;
        r.finish("public key blob")?;
        Ok(key)
    }

    /// Read the type string and algorithm fields from `r`.
    pub(crate) fn read(r: &mut WireReader<'_>) -> Result<Self> {
        match r.read_str("key type")? {
            SSH_RSA => {
                let e = r.read_mpint("rsa exponent")?.to_vec();
                let n = r.read_mpint("rsa modulus")?.to_vec();
                Ok(Self::Rsa { e, n })
            }
            SSH_ED25519 => Ok(Self::Ed25519(read_ed25519_point(r)?)),
            other => Err(SshError::import(format!("unsupported key type {other:?}"))),
        }
    }

    /// Modulus size for RSA, 256 for Ed25519.
    pub fn bits(&self) -> u32 {
        match self {
            Self::Rsa { n, .. } => significant_bits(n),
            Self::Ed25519(_) => 256,
        }
    }

    /// `"{type} {base64 blob}"`, plus `" {comment}"` when one is given.
    pub fn to_openssh_line(&self, comment: Option<&str>) -> String {
        let mut line = format!("{} {}", self.ssh_name(), STANDARD.encode(self.to_blob()));
        if let Some(comment) = comment.filter(|c| !c.is_empty()) {
            line.push(' ');
            line.push_str(comment);
        }
        line
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_blob(&self.to_blob())
    }
}

pub(crate) fn read_ed25519_point(r: &mut WireReader<'_>) -> Result<[u8; ED25519_PUBLIC_LEN]> {
    let bytes = r.read_string("ed25519 public key")?;
    bytes.try_into().map_err(|_| {
        SshError::import(format!(
            "ed25519 public key must be {ED25519_PUBLIC_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

fn significant_bits(magnitude: &[u8]) -> u32 {
    match magnitude.iter().position(|&b| b != 0) {
        Some(i) => {
            let bytes = u32::try_from(magnitude.len() - i).unwrap_or(u32::MAX);
            (bytes - 1) * 8 + (8 - magnitude[i].leading_zeros())
        }
        None => 0,
    }
}

// ---------------------------------------------------------------------------
// Key pair
// ---------------------------------------------------------------------------

/// A generated or imported key pair. Persistence is the caller's business.
#[derive(Clone)]
pub struct SshKeyPair {
    pub key_type: KeyType,
    /// PEM (RSA) or OpenSSH container (Ed25519) text.
    pub private_key: Zeroizing<String>,
    /// OpenSSH public-key line, including the comment when there is one.
    pub public_key: String,
    pub fingerprint: String,
    /// Actual modulus size for RSA, 256 for Ed25519.
    pub bits: u32,
    pub comment: Option<String>,
}

impl SshKeyPair {
    pub(crate) fn new(
        key_type: KeyType,
        private_key: Zeroizing<String>,
        public: &PublicKey,
        comment: Option<String>,
    ) -> Self {
        let comment = comment.filter(|c| !c.is_empty());
        Self {
            key_type,
            private_key,
            public_key: public.to_openssh_line(comment.as_deref()),
            fingerprint: public.fingerprint(),
            bits: public.bits(),
            comment,
        }
    }
}

impl std::fmt::Debug for SshKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshKeyPair")
            .field("key_type", &self.key_type)
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .field("fingerprint", &self.fingerprint)
            .field("bits", &self.bits)
            .field("comment", &self.comment)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// `SHA256:` followed by the unpadded base64 SHA-256 digest of `blob`.
pub fn fingerprint_blob(blob: &[u8]) -> String {
    let hash = digest::digest(&digest::SHA256, blob);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(hash.as_ref()))
}

/// Fingerprint an OpenSSH public-key line (`type base64 [comment]`).
///
/// The blob must decode and its embedded type must agree with the line's
/// type field.
pub fn fingerprint(public_key_line: &str) -> Result<String> {
    let (public, _comment) = parse_public_key_line(public_key_line)?;
    Ok(public.fingerprint())
}

/// Split and decode an OpenSSH public-key line.
pub fn parse_public_key_line(line: &str) -> Result<(PublicKey, Option<String>)> {
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let key_type = parts.next().unwrap_or_default();
    let encoded = parts
        .next()
        .ok_or_else(|| SshError::import("public key line has no key data"))?;
    let comment = parts
        .next()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let blob = Zeroizing::new(
        STANDARD
            .decode(encoded)
            .map_err(|e| SshError::import(format!("public key is not valid base64: {e}")))?,
    );
    let public = PublicKey::from_blob(&blob)?;
    if public.ssh_name() != key_type {
        return Err(SshError::import(format!(
            "public key line says {key_type:?} but blob contains {:?}",
            public.ssh_name()
        )));
    }
    Ok((public, comment))
}
