//! `otpauth://` provisioning URIs.
//!
//! The format is the de-facto Key URI format understood by authenticator
//! apps:
//!
//! ```text
//! otpauth://totp/Issuer:account?secret=BASE32&issuer=Issuer&algorithm=SHA1&digits=6&period=30
//! otpauth://hotp/Issuer:account?secret=BASE32&issuer=Issuer&algorithm=SHA1&digits=6&counter=0
//! ```

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OtpError, Result};
use crate::generator::{Algorithm, DEFAULT_DIGITS, DEFAULT_PERIOD, OtpParams};

const SCHEME: &str = "otpauth";

/// The two OTP flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpKind {
    Totp,
    Hotp,
}

impl OtpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Hotp => "hotp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "totp" => Some(Self::Totp),
            "hotp" => Some(Self::Hotp),
            _ => None,
        }
    }
}

impl std::fmt::Display for OtpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an authenticator needs to enrol a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningUri {
    pub kind: OtpKind,
    pub account: String,
    pub issuer: Option<String>,
    pub secret: String,
    pub algorithm: Algorithm,
    pub digits: u32,
    /// TOTP only.
    pub period: u64,
    /// HOTP only.
    pub counter: u64,
}

impl ProvisioningUri {
    /// A TOTP URI with default parameters.
    pub fn totp(account: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            kind: OtpKind::Totp,
            account: account.into(),
            issuer: None,
            secret: secret.into(),
            algorithm: Algorithm::Sha1,
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            counter: 0,
        }
    }

    /// An HOTP URI starting at `counter`.
    pub fn hotp(account: impl Into<String>, secret: impl Into<String>, counter: u64) -> Self {
        Self {
            kind: OtpKind::Hotp,
            counter,
            ..Self::totp(account, secret)
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_params(mut self, params: &OtpParams) -> Self {
        self.algorithm = params.algorithm;
        self.digits = params.digits;
        self.period = params.period;
        self
    }

    /// The code parameters carried by this URI.
    pub fn params(&self) -> OtpParams {
        OtpParams {
            algorithm: self.algorithm,
            digits: self.digits,
            period: self.period,
        }
    }

    /// Require a non-empty secret and an account label.
    pub fn validate(&self) -> Result<()> {
        if self.secret.trim().is_empty() {
            return Err(OtpError::InvalidUri {
                reason: "secret is required".into(),
            });
        }
        if self.account.is_empty() {
            return Err(OtpError::InvalidUri {
                reason: "account label is required".into(),
            });
        }
        Ok(())
    }

    /// Render the URI.
    pub fn to_uri(&self) -> Result<String> {
        self.validate()?;

        let label = match &self.issuer {
            Some(issuer) => format!(
                "{}:{}",
                urlencoding::encode(issuer),
                urlencoding::encode(&self.account)
            ),
            None => urlencoding::encode(&self.account).into_owned(),
        };

        let mut query = vec![("secret", self.secret.clone())];
        if let Some(issuer) = &self.issuer {
            query.push(("issuer", issuer.clone()));
        }
        query.push(("algorithm", self.algorithm.as_str().to_string()));
        query.push(("digits", self.digits.to_string()));
        match self.kind {
            OtpKind::Totp => query.push(("period", self.period.to_string())),
            OtpKind::Hotp => query.push(("counter", self.counter.to_string())),
        }

        let query = query
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!("{SCHEME}://{}/{label}?{query}", self.kind))
    }

    /// Parse an `otpauth://` URI.
    ///
    /// Missing optional parameters take their defaults. An `issuer` query
    /// parameter wins over an issuer prefix in the label.
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| OtpError::InvalidUri {
            reason: e.to_string(),
        })?;

        if url.scheme() != SCHEME {
            return Err(OtpError::InvalidUri {
                reason: format!("expected scheme {SCHEME}, got {}", url.scheme()),
            });
        }

        let kind_str = url.host_str().unwrap_or_default();
        let kind = OtpKind::parse(kind_str).ok_or_else(|| OtpError::InvalidUri {
            reason: format!("unsupported otp type {kind_str:?}, expected totp or hotp"),
        })?;

        // Split on the literal separator before decoding: a `%3A` inside
        // either half belongs to that half.
        let raw_label = url.path().trim_start_matches('/');
        let (label_issuer, account) = match raw_label.split_once(':') {
            Some((issuer, account)) => (Some(decode_label(issuer)?), decode_label(account)?),
            None => (None, decode_label(raw_label)?),
        };

        let mut parsed = Self {
            kind,
            account,
            issuer: label_issuer.filter(|i| !i.is_empty()),
            secret: String::new(),
            algorithm: Algorithm::Sha1,
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            counter: 0,
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "secret" => parsed.secret = value.into_owned(),
                "issuer" if !value.is_empty() => parsed.issuer = Some(value.into_owned()),
                "algorithm" => {
                    parsed.algorithm =
                        Algorithm::parse(&value).ok_or_else(|| OtpError::InvalidUri {
                            reason: format!("unsupported algorithm {value:?}"),
                        })?;
                }
                "digits" => parsed.digits = parse_number(&key, &value)?,
                "period" => parsed.period = parse_number(&key, &value)?,
                "counter" => parsed.counter = parse_number(&key, &value)?,
                _ => {}
            }
        }

        parsed.validate()?;
        Ok(parsed)
    }
}

fn decode_label(part: &str) -> Result<String> {
    let decoded = urlencoding::decode(part).map_err(|e| OtpError::InvalidUri {
        reason: format!("label is not valid utf-8: {e}"),
    })?;
    Ok(decoded.trim().to_string())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| OtpError::InvalidUri {
        reason: format!("{key} must be a non-negative integer, got {value:?}"),
    })
}
