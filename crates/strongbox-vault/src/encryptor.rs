//! Envelope encryption of secret values under project data keys.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{self, IV_LEN};
use crate::error::{Result, VaultError};
use crate::keys::KeyManager;

/// Ciphertext plus what is needed to open it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// AES-256-GCM output with the 16-byte tag appended.
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    /// The data key used; decryption always goes back to this exact key.
    pub key_id: String,
}

#[derive(Clone)]
pub struct Encryptor {
    keys: KeyManager,
}

impl Encryptor {
    pub fn new(keys: KeyManager) -> Self {
        Self { keys }
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    /// Encrypt under the project's current key with a fresh IV.
    pub fn encrypt(&self, plaintext: &[u8], project_id: &str) -> Result<EncryptedPayload> {
        let key = self.keys.current_key(project_id)?;
        let (iv, ciphertext) = crypto::encrypt(plaintext, key.material())?;
        Ok(EncryptedPayload {
            ciphertext,
            iv,
            key_id: key.key_id,
        })
    }

    /// Decrypt with the key named by `key_id`, whether active or retired.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown key, and
    /// [`VaultError::DecryptionFailed`] when the tag does not verify.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        key_id: &str,
        project_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.keys.get_key(key_id, project_id)?;
        crypto::decrypt(iv, ciphertext, key.material()).inspect_err(|_| {
            tracing::warn!(project_id, key_id, "ciphertext failed authentication");
        })
    }

    pub fn decrypt_payload(
        &self,
        payload: &EncryptedPayload,
        project_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt(&payload.ciphertext, &payload.iv, &payload.key_id, project_id)
    }

    pub fn encrypt_str(&self, plaintext: &str, project_id: &str) -> Result<EncryptedPayload> {
        self.encrypt(plaintext.as_bytes(), project_id)
    }

    /// Decrypt and require UTF-8.
    ///
    /// Authenticated bytes that are not UTF-8 are stored-data corruption,
    /// reported as [`VaultError::Internal`] rather than a decryption failure.
    pub fn decrypt_to_string(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        key_id: &str,
        project_id: &str,
    ) -> Result<String> {
        let bytes = self.decrypt(ciphertext, iv, key_id, project_id)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            VaultError::Internal(format!("decrypted value under key {key_id} is not utf-8: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MasterKey;
    use crate::db::Database;

    fn encryptor() -> Encryptor {
        let db = Database::open_in_memory().unwrap();
        Encryptor::new(KeyManager::new(db, MasterKey::development()))
    }

    #[test]
    fn payload_round_trip() {
        let enc = encryptor();
        let payload = enc.encrypt_str("sk_live_abc123", "proj").unwrap();
        assert_eq!(payload.ciphertext.len(), "sk_live_abc123".len() + crypto::TAG_LEN);

        let plain = enc.decrypt_payload(&payload, "proj").unwrap();
        assert_eq!(plain.as_slice(), b"sk_live_abc123");
        assert_eq!(
            enc.decrypt_to_string(&payload.ciphertext, &payload.iv, &payload.key_id, "proj")
                .unwrap(),
            "sk_live_abc123"
        );
    }

    #[test]
    fn non_utf8_plaintext_is_not_a_security_event() {
        let enc = encryptor();
        let payload = enc.encrypt(&[0xff, 0xfe], "proj").unwrap();

        let err = enc
            .decrypt_to_string(&payload.ciphertext, &payload.iv, &payload.key_id, "proj")
            .unwrap_err();
        assert!(matches!(err, VaultError::Internal(_)), "{err}");
        assert!(!err.is_security_event());
    }

    #[test]
    fn tampering_is_a_security_event_not_not_found() {
        let enc = encryptor();
        let mut payload = enc.encrypt_str("value", "proj").unwrap();
        payload.ciphertext[0] ^= 0x01;

        let err = enc.decrypt_payload(&payload, "proj").unwrap_err();
        assert!(err.is_security_event(), "{err}");
    }

    #[test]
    fn foreign_project_cannot_decrypt() {
        let enc = encryptor();
        let payload = enc.encrypt_str("value", "a").unwrap();
        assert!(matches!(
            enc.decrypt_payload(&payload, "b"),
            Err(VaultError::NotFound { .. })
        ));
    }

    #[test]
    fn rotation_keeps_old_payloads_readable() {
        let enc = encryptor();
        let before = enc.encrypt_str("old", "proj").unwrap();
        let rotated = enc.key_manager().rotate_key("proj").unwrap();
        let after = enc.encrypt_str("new", "proj").unwrap();

        assert_ne!(before.key_id, after.key_id);
        assert_eq!(after.key_id, rotated.key_id);
        assert_eq!(enc.decrypt_payload(&before, "proj").unwrap().as_slice(), b"old");
        assert_eq!(enc.decrypt_payload(&after, "proj").unwrap().as_slice(), b"new");
    }
}
