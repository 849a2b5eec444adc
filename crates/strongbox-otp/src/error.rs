//! OTP error types.
//!
//! Every fallible operation in this crate returns [`OtpError`]. A code that
//! simply does not match is *not* an error: verification reports it through
//! `valid = false` so that callers never confuse a wrong code with a broken
//! credential.

/// Unified error type for the OTP engine.
#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    /// The shared secret is not valid base32.
    #[error("secret is not valid base32")]
    InvalidSecret,

    /// A parameter is out of range or a required field is missing.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// An `otpauth://` URI could not be parsed.
    #[error("invalid provisioning uri: {reason}")]
    InvalidUri { reason: String },

    /// The HOTP counter store failed to load or persist a counter.
    #[error("counter store failure: {reason}")]
    CounterStore { reason: String },

    /// The system random number generator failed.
    #[error("random generation failed")]
    Random,
}

/// Convenience alias used throughout the OTP crate.
pub type Result<T> = std::result::Result<T, OtpError>;
