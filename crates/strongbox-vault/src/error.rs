//! Vault error types.
//!
//! Every public API in this crate returns [`VaultError`]. Decryption failures
//! are their own variant so callers can treat a failed authentication tag as
//! a security event rather than a missing record.

/// Unified error type for the Strongbox vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Startup ------------------------------------------------------------
    /// Invalid or missing configuration, such as a production deployment
    /// without a master key. Fatal at startup.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (bad key length, random source failure).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// The authentication tag did not verify: tampered ciphertext, wrong IV
    /// or wrong key.
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    // -- Lookup and input ---------------------------------------------------
    /// Unknown key id, secret, environment or policy.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Missing or malformed input.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    // -- Underlying errors --------------------------------------------------
    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error reading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic ------------------------------------------------------------
    /// Unexpected internal failure, e.g. a poisoned connection lock.
    #[error("internal vault error: {0}")]
    Internal(String),
}

impl VaultError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Whether this failure means stored ciphertext did not authenticate.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::DecryptionFailed { .. })
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_decryption_failures_are_security_events() {
        let tampered = VaultError::DecryptionFailed {
            reason: "tag mismatch".into(),
        };
        assert!(tampered.is_security_event());
        assert!(!VaultError::not_found("secret", "DB_URL").is_security_event());
        assert!(!VaultError::validation("empty key").is_security_event());
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = VaultError::not_found("environment", "staging");
        assert_eq!(err.to_string(), "environment not found: staging");
    }
}
