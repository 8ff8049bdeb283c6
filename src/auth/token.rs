//! Signing and verification of service tokens.
//!
//! Tokens are HS256 JWTs signed with the owning service's symmetric secret.
//! The claim set is an arbitrary backend-supplied mapping plus a mandatory
//! `exp` timestamp (absolute Unix seconds); tokens signed for one service
//! never verify against another service's secret.

use std::collections::BTreeMap;
use std::time::Duration;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde_json::Value;
use thiserror::Error;

/// Claim name -> claim value mapping embedded in a token.
pub type ClaimSet = BTreeMap<String, Value>;

/// Reserved claim carrying the absolute expiry timestamp.
pub const EXP_CLAIM: &str = "exp";

/// Errors from token signing and verification.
///
/// Verification failures are classified for logging; callers collapse all of
/// them to a deny and never surface the distinction to clients.
#[derive(Error, Debug)]
pub enum TokenError {
    /// The credential is not structurally a JWT
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The signature does not match the service secret
    #[error("token signature invalid")]
    InvalidSignature,

    /// The token's `exp` is in the past
    #[error("token expired")]
    Expired,

    /// Any other verification failure (missing `exp`, wrong algorithm, ...)
    #[error("token verification failed: {0}")]
    Verification(String),

    /// Signing failed during issuance
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Sign a claim set with the service secret, valid for `ttl` from now.
///
/// The `exp` claim is always set by the signer; a backend-supplied `exp`
/// claim header cannot shift it.
pub fn sign(claims: &ClaimSet, ttl: Duration, secret: &str) -> Result<String, TokenError> {
    let mut payload = claims.clone();
    let exp = jsonwebtoken::get_current_timestamp() + ttl.as_secs();
    payload.insert(EXP_CLAIM.to_string(), Value::from(exp));

    encode(
        &Header::new(Algorithm::HS256),
        &payload,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TokenError::Signing(e.to_string()))
}

/// Verify a token against the service secret, returning its claims with the
/// `exp` bookkeeping claim removed.
///
/// `exp` is required and checked without leeway, so the allow/deny boundary
/// is exactly the signed expiry instant.
pub fn verify(token: &str, secret: &str) -> Result<ClaimSet, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = decode::<ClaimSet>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(classify_error)?;

    let mut claims = data.claims;
    claims.remove(EXP_CLAIM);
    Ok(claims)
}

/// Classify a jsonwebtoken error for observability.
fn classify_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => TokenError::Malformed(e.to_string()),
        _ => TokenError::Verification(e.to_string()),
    }
}
