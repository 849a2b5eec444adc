//! HOTP (RFC 4226) and TOTP (RFC 6238) code generation.
//!
//! Both algorithms share one primitive: HMAC the big-endian 8-byte counter
//! with the shared secret, dynamically truncate the digest to 31 bits and
//! reduce it modulo `10^digits`. TOTP derives the counter from the clock as
//! `floor(unix_time / period)`.

use chrono::{DateTime, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{OtpError, Result};
use crate::secret;

/// Default number of digits in a code.
pub const DEFAULT_DIGITS: u32 = 6;

/// Default TOTP time step in seconds.
pub const DEFAULT_PERIOD: u64 = 30;

/// Accepted range for the number of digits.
const MIN_DIGITS: u32 = 6;
const MAX_DIGITS: u32 = 8;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// HMAC hash function used to derive codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Algorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Name used in provisioning URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Parse a provisioning name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SHA1" => Some(Self::Sha1),
            "SHA256" => Some(Self::Sha256),
            "SHA512" => Some(Self::Sha512),
            _ => None,
        }
    }

    fn hmac_algorithm(&self) -> hmac::Algorithm {
        match self {
            Self::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => hmac::HMAC_SHA256,
            Self::Sha512 => hmac::HMAC_SHA512,
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code parameters shared by HOTP and TOTP. `period` is ignored for HOTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpParams {
    pub algorithm: Algorithm,
    pub digits: u32,
    pub period: u64,
}

impl Default for OtpParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Sha1,
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
        }
    }
}

impl OtpParams {
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_digits(mut self, digits: u32) -> Self {
        self.digits = digits;
        self
    }

    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    /// Reject digit counts outside 6..=8 and a zero period.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&self.digits) {
            return Err(OtpError::Validation {
                reason: format!(
                    "digits must be between {MIN_DIGITS} and {MAX_DIGITS}, got {}",
                    self.digits
                ),
            });
        }
        if self.period == 0 {
            return Err(OtpError::Validation {
                reason: "period must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Core primitive
// ---------------------------------------------------------------------------

/// Compute the code for `counter` from raw key bytes.
pub(crate) fn hotp_code(key: &[u8], counter: u64, digits: u32, algorithm: Algorithm) -> String {
    let key = hmac::Key::new(algorithm.hmac_algorithm(), key);
    let tag = hmac::sign(&key, &counter.to_be_bytes());
    let digest = tag.as_ref();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    let modulus = 10u32.pow(digits);
    format!("{:0width$}", binary % modulus, width = digits as usize)
}

/// TOTP counter for a unix timestamp.
pub(crate) fn time_step(unix_secs: i64, period: u64) -> Result<u64> {
    let secs = u64::try_from(unix_secs).map_err(|_| OtpError::Validation {
        reason: "time precedes the unix epoch".into(),
    })?;
    Ok(secs / period)
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// A generated time-based code and its validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpCode {
    pub code: String,
    /// The time-step counter the code was derived from.
    pub counter: u64,
    /// End of the current period.
    pub expires_at: DateTime<Utc>,
    /// Whole seconds until `expires_at`.
    pub remaining_seconds: u64,
}

/// Produces HOTP and TOTP codes.
#[derive(Debug, Clone)]
pub struct Generator<C: Clock> {
    clock: C,
}

impl<C: Clock> Generator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    /// Code for the current period.
    pub fn totp(&self, secret: &str, params: &OtpParams) -> Result<TotpCode> {
        self.totp_at(secret, params, self.clock.now())
    }

    /// Code for the period containing `at`.
    pub fn totp_at(&self, secret: &str, params: &OtpParams, at: DateTime<Utc>) -> Result<TotpCode> {
        params.validate()?;
        let key = secret::decode(secret)?;

        let now = at.timestamp();
        let counter = time_step(now, params.period)?;
        let code = hotp_code(&key, counter, params.digits, params.algorithm);

        let period_end = (counter + 1).saturating_mul(params.period);
        let period_end = i64::try_from(period_end).unwrap_or(i64::MAX);
        let expires_at = DateTime::from_timestamp(period_end, 0).unwrap_or(at);
        let remaining_seconds = u64::try_from(period_end - now).unwrap_or(0);

        tracing::trace!(counter, remaining_seconds, "generated totp code");

        Ok(TotpCode {
            code,
            counter,
            expires_at,
            remaining_seconds,
        })
    }

    /// Code for an explicit counter value.
    pub fn hotp(&self, secret: &str, counter: u64, params: &OtpParams) -> Result<String> {
        params.validate()?;
        let key = secret::decode(secret)?;
        Ok(hotp_code(&key, counter, params.digits, params.algorithm))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
