//! Code verification with clock-drift and counter look-ahead tolerance.
//!
//! A mismatching code yields `valid = false`, never an error. Errors are
//! reserved for malformed secrets and out-of-range parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::Result;
use crate::generator::{OtpParams, hotp_code, time_step};
use crate::secret;

/// Default TOTP drift window, in periods either side of now.
pub const DEFAULT_DRIFT_WINDOW: u32 = 1;

/// Default number of future HOTP counters checked.
pub const DEFAULT_LOOKAHEAD: u64 = 10;

/// Outcome of a TOTP check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpVerification {
    pub valid: bool,
    /// Periods between the matching code and now; negative means the code
    /// came from the past. `None` when nothing matched.
    pub drift: Option<i64>,
}

impl TotpVerification {
    fn rejected() -> Self {
        Self {
            valid: false,
            drift: None,
        }
    }
}

/// Outcome of an HOTP check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotpVerification {
    pub valid: bool,
    pub matched_counter: Option<u64>,
    /// `matched_counter + 1`. The caller must persist this before accepting
    /// the code, otherwise the same code can be replayed. `None` on a match
    /// at `u64::MAX`, which can never be committed.
    pub new_counter: Option<u64>,
}

impl HotpVerification {
    pub(crate) fn rejected() -> Self {
        Self {
            valid: false,
            matched_counter: None,
            new_counter: None,
        }
    }
}

/// Verifies HOTP and TOTP codes.
#[derive(Debug, Clone)]
pub struct Verifier<C: Clock> {
    clock: C,
}

impl<C: Clock> Verifier<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    /// Check `code` against the current period and `drift_window` periods
    /// either side of it.
    ///
    /// Offsets are tried nearest-first (0, -1, +1, -2, +2, ...), so the
    /// reported drift is the smallest one that matches.
    pub fn verify_totp(
        &self,
        secret: &str,
        code: &str,
        params: &OtpParams,
        drift_window: u32,
    ) -> Result<TotpVerification> {
        self.verify_totp_at(secret, code, params, drift_window, self.clock.now())
    }

    pub fn verify_totp_at(
        &self,
        secret: &str,
        code: &str,
        params: &OtpParams,
        drift_window: u32,
        at: DateTime<Utc>,
    ) -> Result<TotpVerification> {
        params.validate()?;
        let key = secret::decode(secret)?;
        let Some(candidate) = normalize_code(code, params.digits) else {
            return Ok(TotpVerification::rejected());
        };

        let current = time_step(at.timestamp(), params.period)?;
        let window = i64::from(drift_window);

        for offset in drift_offsets(window) {
            let Some(counter) = current.checked_add_signed(offset) else {
                continue;
            };
            let expected = hotp_code(&key, counter, params.digits, params.algorithm);
            if constant_time_eq(expected.as_bytes(), candidate.as_bytes()) {
                if offset != 0 {
                    tracing::debug!(drift = offset, "totp accepted with clock drift");
                }
                return Ok(TotpVerification {
                    valid: true,
                    drift: Some(offset),
                });
            }
        }

        tracing::debug!(drift_window, "totp code rejected");
        Ok(TotpVerification::rejected())
    }

    /// Scan counters `counter..=counter + lookahead` for a match.
    ///
    /// This does not persist anything. See
    /// [`verify_hotp_and_commit`](crate::counter::verify_hotp_and_commit)
    /// for the replay-safe variant.
    pub fn verify_hotp(
        &self,
        secret: &str,
        code: &str,
        counter: u64,
        lookahead: u64,
        params: &OtpParams,
    ) -> Result<HotpVerification> {
        params.validate()?;
        let key = secret::decode(secret)?;
        let Some(candidate) = normalize_code(code, params.digits) else {
            return Ok(HotpVerification::rejected());
        };

        let last = counter.saturating_add(lookahead);
        for candidate_counter in counter..=last {
            let expected = hotp_code(&key, candidate_counter, params.digits, params.algorithm);
            if constant_time_eq(expected.as_bytes(), candidate.as_bytes()) {
                tracing::debug!(
                    skipped = candidate_counter - counter,
                    "hotp code matched"
                );
                return Ok(HotpVerification {
                    valid: true,
                    matched_counter: Some(candidate_counter),
                    new_counter: candidate_counter.checked_add(1),
                });
            }
        }

        tracing::debug!(counter, lookahead, "hotp code rejected");
        Ok(HotpVerification::rejected())
    }
}

/// 0, -1, 1, -2, 2, ... up to `window`.
fn drift_offsets(window: i64) -> impl Iterator<Item = i64> {
    std::iter::once(0).chain((1..=window).flat_map(|d| [-d, d]))
}

/// Strip spaces and reject anything that is not exactly `digits` digits.
fn normalize_code(code: &str, digits: u32) -> Option<String> {
    let cleaned: String = code.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() != digits as usize || !cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(cleaned)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
