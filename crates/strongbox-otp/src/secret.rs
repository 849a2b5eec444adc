//! Base32 shared secrets.
//!
//! OTP seeds travel as RFC 4648 base32 text (the form authenticator apps
//! accept). Generated secrets are 20 random bytes, the HMAC-SHA1 block-size
//! recommendation from RFC 4226, encoded without `=` padding.

use data_encoding::BASE32_NOPAD;
use ring::rand::SecureRandom;
use zeroize::Zeroizing;

use crate::error::{OtpError, Result};

/// Number of random bytes in a generated secret.
pub const SECRET_LEN: usize = 20;

/// Generate a new random secret and return it base32-encoded, unpadded.
pub fn generate(rng: &dyn SecureRandom) -> Result<String> {
    let mut bytes = Zeroizing::new([0u8; SECRET_LEN]);
    rng.fill(bytes.as_mut()).map_err(|_| OtpError::Random)?;
    Ok(BASE32_NOPAD.encode(bytes.as_ref()))
}

/// Decode a base32 secret into raw key bytes.
///
/// Input is normalised first: surrounding whitespace and embedded spaces
/// are removed, letters are upper-cased and trailing `=` padding is dropped.
pub fn decode(secret: &str) -> Result<Zeroizing<Vec<u8>>> {
    let normalized = normalize(secret);
    if normalized.is_empty() {
        return Err(OtpError::InvalidSecret);
    }
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map(Zeroizing::new)
        .map_err(|_| OtpError::InvalidSecret)
}

/// Returns `true` if `secret` decodes as base32. Length is not checked.
pub fn is_valid(secret: &str) -> bool {
    decode(secret).is_ok()
}

fn normalize(secret: &str) -> Zeroizing<String> {
    let mut out: String = secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    while out.ends_with('=') {
        out.pop();
    }
    Zeroizing::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    #[test]
    fn generated_secret_is_unpadded_and_decodes_to_twenty_bytes() {
        let secret = generate(&SystemRandom::new()).unwrap();
        assert_eq!(secret.len(), 32);
        assert!(!secret.contains('='));
        assert_eq!(decode(&secret).unwrap().len(), SECRET_LEN);
    }

    #[test]
    fn generated_secrets_differ() {
        let rng = SystemRandom::new();
        assert_ne!(generate(&rng).unwrap(), generate(&rng).unwrap());
    }

    #[test]
    fn decode_accepts_lowercase_spaces_and_padding() {
        let canonical = decode("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").unwrap();
        assert_eq!(canonical.as_slice(), b"12345678901234567890");

        let messy = decode(" gezd gnbv gy3t qojq gezd gnbv gy3t qojq ").unwrap();
        assert_eq!(messy.as_slice(), canonical.as_slice());

        let padded = decode("JBSWY3DPEE======").unwrap();
        assert_eq!(padded.as_slice(), b"Hello!");
    }

    #[test]
    fn validity_checks_decodability_only() {
        assert!(is_valid("JBSWY3DPEHPK3PXP"));
        assert!(is_valid("MZXQ"));
        assert!(!is_valid("not base32!"));
        assert!(!is_valid("0189"));
        assert!(!is_valid(""));
    }
}
