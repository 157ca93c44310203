//! Bearer token verification.
//!
//! [`TokenVerifier`] turns the opaque string after `Bearer ` into an
//! [`IdentityClaim`] or a typed [`VerificationFailure`]. The HMAC
//! implementation checks, in order:
//!
//! 1. token structure and HS256 signature
//! 2. claim structure (`user_id`/`sub`, `email`, numeric dates)
//! 3. issuer, when one is configured
//! 4. `exp` and `nbf` against an explicit `now`, with zero leeway
//!
//! Verification is CPU-bound and never suspends.

use std::fmt;

use chrono::{DateTime, Utc};
use http::header::{HeaderMap, AUTHORIZATION};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Case-sensitive scheme prefix of the `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Why a bearer credential was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum VerificationFailure {
    /// No `Authorization` header.
    #[error("authorization header missing")]
    MissingHeader,
    /// `Authorization` present without the `Bearer ` prefix.
    #[error("authorization header is not a bearer credential")]
    MalformedHeader,
    /// Undecodable token, bad signature, wrong algorithm, issuer mismatch or
    /// not yet valid.
    #[error("token signature or structure is invalid")]
    InvalidSignature,
    /// `exp` is at or before the verification time.
    #[error("token expired")]
    Expired,
    /// Signature is fine but the payload does not carry a usable identity.
    #[error("token claims are malformed")]
    MalformedClaims,
}

impl VerificationFailure {
    /// Machine-readable code surfaced to clients.
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader => "malformed_header",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::MalformedClaims => "malformed_claims",
        }
    }
}

/// A verified user identity. Only produced by a [`TokenVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    subject: u64,
    email: String,
    issued_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl IdentityClaim {
    /// Builds a claim. Intended for [`TokenVerifier`] implementations.
    pub fn new(
        subject: u64,
        email: String,
        issued_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            subject,
            email,
            issued_at,
            expires_at,
        }
    }

    /// Positive user identifier.
    pub fn subject(&self) -> u64 {
        self.subject
    }

    /// Email exactly as carried by the token (may be empty).
    pub fn email(&self) -> &str {
        &self.email
    }

    /// `iat`, if the token carried one.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// `exp`, if the token carried one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

/// Validates a bearer token into an identity claim.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verifies `token` (without the `Bearer ` prefix) against the wall clock.
    fn verify(&self, token: &str) -> Result<IdentityClaim, VerificationFailure>;
}

/// HS256 verifier over a shared secret.
pub struct HmacTokenVerifier {
    key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
}

impl fmt::Debug for HmacTokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacTokenVerifier")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

/// Claims as they appear on the wire, before structural checks.
#[derive(Debug, Deserialize)]
struct RawClaims {
    user_id: Option<Value>,
    sub: Option<Value>,
    email: Option<Value>,
    iat: Option<Value>,
    exp: Option<Value>,
    nbf: Option<Value>,
    iss: Option<Value>,
}

impl HmacTokenVerifier {
    /// Creates a verifier for `secret`, optionally pinning the `iss` claim.
    pub fn new(secret: &[u8], issuer: Option<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time and issuer checks run in `verify_at` so they see the caller's clock.
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            issuer,
        }
    }

    /// Verifies `token` as of `now`.
    pub fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<IdentityClaim, VerificationFailure> {
        decode_header(token).map_err(|_| VerificationFailure::InvalidSignature)?;

        let raw = decode::<RawClaims>(token, &self.key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::Json(_) | ErrorKind::MissingRequiredClaim(_) => {
                    VerificationFailure::MalformedClaims
                }
                ErrorKind::ExpiredSignature => VerificationFailure::Expired,
                _ => VerificationFailure::InvalidSignature,
            })?
            .claims;

        let subject = raw
            .user_id
            .as_ref()
            .or(raw.sub.as_ref())
            .and_then(parse_subject)
            .ok_or(VerificationFailure::MalformedClaims)?;

        let email = match raw.email {
            Some(Value::String(email)) if !email.chars().any(char::is_control) => email,
            _ => return Err(VerificationFailure::MalformedClaims),
        };

        let issued_at = parse_numeric_date(raw.iat.as_ref())?;
        let expires_at = parse_numeric_date(raw.exp.as_ref())?;
        let not_before = parse_numeric_date(raw.nbf.as_ref())?;

        if let Some(expected) = &self.issuer {
            match &raw.iss {
                Some(Value::String(iss)) if iss == expected => {}
                _ => return Err(VerificationFailure::InvalidSignature),
            }
        }

        if expires_at.is_some_and(|exp| now >= exp) {
            return Err(VerificationFailure::Expired);
        }
        if not_before.is_some_and(|nbf| now < nbf) {
            return Err(VerificationFailure::InvalidSignature);
        }

        Ok(IdentityClaim {
            subject,
            email,
            issued_at,
            expires_at,
        })
    }
}

impl TokenVerifier for HmacTokenVerifier {
    fn verify(&self, token: &str) -> Result<IdentityClaim, VerificationFailure> {
        self.verify_at(token, Utc::now())
    }
}

/// Extracts the bearer token from request headers.
///
/// The prefix match is case-sensitive; `bearer x` is malformed.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, VerificationFailure> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(VerificationFailure::MissingHeader)?;
    let value = value
        .to_str()
        .map_err(|_| VerificationFailure::MalformedHeader)?;
    match value.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(VerificationFailure::MalformedHeader),
    }
}

fn parse_subject(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()?
        }
        _ => return None,
    };
    (id > 0).then_some(id)
}

#[allow(clippy::cast_possible_truncation)]
fn parse_numeric_date(value: Option<&Value>) -> Result<Option<DateTime<Utc>>, VerificationFailure> {
    let Some(value) = value else {
        return Ok(None);
    };
    let secs = value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
        .ok_or(VerificationFailure::MalformedClaims)?;
    DateTime::from_timestamp(secs, 0)
        .map(Some)
        .ok_or(VerificationFailure::MalformedClaims)
}
