//! AES-256-GCM primitives using the `ring` crate.
//!
//! Both layers of the envelope go through here: data keys are sealed under
//! the master key, and secret values are sealed under a project's data key.
//!
//! - Every call to [`encrypt`] draws a fresh random 96-bit IV. An IV is
//!   never reused under the same key.
//! - Ciphertexts carry the 128-bit authentication tag appended by `ring`.
//! - A tag that does not verify is always [`VaultError::DecryptionFailed`].

use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Length of an AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the GCM IV in bytes (96 bits).
pub const IV_LEN: usize = NONCE_LEN;

/// Length of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Stored name of the only supported data key algorithm.
pub const KEY_TYPE: &str = "aes-256-gcm";

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// Yields exactly one nonce, then errors, so each bound key seals or opens
/// a single message.
struct SingleNonce(Option<[u8; IV_LEN]>);

impl SingleNonce {
    fn new(bytes: [u8; IV_LEN]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under a 256-bit `key`.
///
/// Returns `(iv, ciphertext)`; the ciphertext ends with the tag.
///
/// # Errors
///
/// [`VaultError::EncryptionFailed`] if the key length is wrong or the random
/// source fails.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<([u8; IV_LEN], Vec<u8>)> {
    if key.len() != KEY_LEN {
        return Err(VaultError::EncryptionFailed {
            reason: format!("key must be {KEY_LEN} bytes, got {}", key.len()),
        });
    }

    let mut iv = [0u8; IV_LEN];
    SystemRandom::new()
        .fill(&mut iv)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random iv".into(),
        })?;

    let unbound = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::EncryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;
    let mut sealing_key = SealingKey::new(unbound, SingleNonce::new(iv));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "encrypted payload"
    );

    Ok((iv, in_out))
}

/// Decrypt `ciphertext` (tag included) with `iv` and `key`.
///
/// # Errors
///
/// [`VaultError::DecryptionFailed`] if the IV or key has the wrong length or
/// the tag does not verify.
pub fn decrypt(iv: &[u8], ciphertext: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if key.len() != KEY_LEN {
        return Err(VaultError::DecryptionFailed {
            reason: format!("key must be {KEY_LEN} bytes, got {}", key.len()),
        });
    }
    let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| VaultError::DecryptionFailed {
        reason: format!("iv must be {IV_LEN} bytes, got {}", iv.len()),
    })?;
    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::DecryptionFailed {
            reason: "ciphertext shorter than authentication tag".into(),
        });
    }

    let unbound = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::DecryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;
    let mut opening_key = aead::OpeningKey::new(unbound, SingleNonce::new(iv));

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = opening_key
        .open_in_place(Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::DecryptionFailed {
            reason: "authentication tag mismatch".into(),
        })?
        .len();
    in_out.truncate(plaintext_len);

    tracing::trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len,
        "decrypted payload"
    );

    Ok(in_out)
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Generate a fresh random data key.
pub fn generate_key() -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    SystemRandom::new()
        .fill(&mut key[..])
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate data key".into(),
        })?;
    Ok(key)
}

/// SHA-256 of `input`, used to stretch a master-key passphrase to 32 bytes.
pub fn sha256_key(input: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let hash = digest::digest(&digest::SHA256, input);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(hash.as_ref());
    key
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = generate_key().unwrap();
        let plaintext = b"postgres://app:hunter2@db/prod";

        let (iv, ciphertext) = encrypt(plaintext, &key[..]).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);

        let decrypted = decrypt(&iv, &ciphertext, &key[..]).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn every_encryption_draws_a_new_iv() {
        let key = generate_key().unwrap();
        let (iv1, ct1) = encrypt(b"same", &key[..]).unwrap();
        let (iv2, ct2) = encrypt(b"same", &key[..]).unwrap();
        assert_ne!(iv1, iv2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn wrong_key_is_decryption_failure() {
        let key1 = generate_key().unwrap();
        let key2 = generate_key().unwrap();

        let (iv, ciphertext) = encrypt(b"secret", &key1[..]).unwrap();
        let result = decrypt(&iv, &ciphertext, &key2[..]);
        assert!(matches!(result, Err(VaultError::DecryptionFailed { .. })));
    }

    #[test]
    fn wrong_iv_is_decryption_failure() {
        let key = generate_key().unwrap();
        let (mut iv, ciphertext) = encrypt(b"secret", &key[..]).unwrap();
        iv[0] ^= 0x80;
        let result = decrypt(&iv, &ciphertext, &key[..]);
        assert!(matches!(result, Err(VaultError::DecryptionFailed { .. })));
    }

    #[test]
    fn short_inputs_are_decryption_failures() {
        let key = generate_key().unwrap();
        assert!(matches!(
            decrypt(&[0u8; 8], &[0u8; 32], &key[..]),
            Err(VaultError::DecryptionFailed { .. })
        ));
        assert!(matches!(
            decrypt(&[0u8; IV_LEN], &[0u8; 4], &key[..]),
            Err(VaultError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short_key = vec![0u8; 16];
        let result = encrypt(b"test", &short_key);
        assert!(matches!(result, Err(VaultError::EncryptionFailed { .. })));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = generate_key().unwrap();
        let (iv, ciphertext) = encrypt(b"", &key[..]).unwrap();
        assert_eq!(ciphertext.len(), TAG_LEN);
        assert!(decrypt(&iv, &ciphertext, &key[..]).unwrap().is_empty());
    }

    #[test]
    fn sha256_key_is_deterministic() {
        assert_eq!(*sha256_key(b"correct horse"), *sha256_key(b"correct horse"));
        assert_ne!(*sha256_key(b"correct horse"), *sha256_key(b"battery staple"));
    }
}
