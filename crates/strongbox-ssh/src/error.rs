//! SSH key engine error types.

/// Unified error type for SSH key generation and import.
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    /// Key material could not be recognised or parsed. The reason is meant
    /// for humans and never contains key bytes.
    #[error("import failed: {reason}")]
    Import { reason: String },

    /// Unsupported key type or otherwise invalid request.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Key generation or encoding failed.
    #[error("key generation failed: {reason}")]
    Generation { reason: String },
}

impl SshError {
    pub(crate) fn import(reason: impl Into<String>) -> Self {
        Self::Import {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the SSH crate.
pub type Result<T> = std::result::Result<T, SshError>;
