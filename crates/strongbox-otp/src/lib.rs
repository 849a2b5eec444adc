//! One-time password engine for Strongbox.
//!
//! Stateless HOTP (RFC 4226) and TOTP (RFC 6238) generation and
//! verification over base32 shared secrets, plus `otpauth://` provisioning
//! URIs. Nothing here is persisted: the HOTP counter lives with the caller,
//! who can use [`counter::verify_hotp_and_commit`] with a
//! [`counter::HotpCounterStore`] to advance it atomically.
//!
//! # Modules
//!
//! - [`secret`]: random secret generation and base32 handling.
//! - [`generator`]: code generation and parameters.
//! - [`verifier`]: drift-tolerant TOTP and look-ahead HOTP checks.
//! - [`counter`]: replay-safe HOTP counter contract.
//! - [`provisioning`]: `otpauth://` URI building and parsing.
//! - [`clock`]: injectable time source.
//!
//! # Quick Start
//!
//! ```rust
//! use strongbox_otp::{FixedClock, Generator, OtpParams, Verifier};
//!
//! # fn example() -> strongbox_otp::Result<()> {
//! let clock = FixedClock::at_unix(1_700_000_000);
//! let secret = "JBSWY3DPEHPK3PXP";
//!
//! let code = Generator::new(clock).totp(secret, &OtpParams::default())?;
//! let check = Verifier::new(clock).verify_totp(secret, &code.code, &OtpParams::default(), 1)?;
//! assert!(check.valid);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod clock;
pub mod counter;
pub mod error;
pub mod generator;
pub mod provisioning;
pub mod secret;
pub mod verifier;

pub use clock::{Clock, FixedClock, SystemClock};
pub use counter::{HotpCounterStore, verify_hotp_and_commit};
pub use error::{OtpError, Result};
pub use generator::{Algorithm, Generator, OtpParams, TotpCode};
pub use provisioning::{OtpKind, ProvisioningUri};
pub use verifier::{
    DEFAULT_DRIFT_WINDOW, DEFAULT_LOOKAHEAD, HotpVerification, TotpVerification, Verifier,
};
