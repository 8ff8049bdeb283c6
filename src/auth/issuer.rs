//! Token Issuance Engine.
//!
//! After an upstream response comes back, this engine checks for the
//! reserved trigger header. If present, it drains the whole reserved header
//! vocabulary from the response, assembles the claim set the backend
//! declared, and signs a token for the caller. Without the trigger the
//! response passes through untouched.

use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::headers::{classify, is_reserved, ReservedHeader, TRIGGER_HEADER};
use crate::auth::token::{self, ClaimSet, TokenError};
use crate::config::duration_format;
use crate::registry::ServiceDescriptor;

/// Inspect an upstream response's headers and mint a token if the backend
/// asked for one.
///
/// When the trigger header is present, every reserved header (trigger,
/// expiry override, claim headers) is removed from `headers` so the
/// backend's signaling vocabulary never reaches the client; the returned
/// token carries the declared claims plus the expiry.
///
/// The validity window is `default_ttl` (deployment-wide), narrowed by the
/// service descriptor's own `token_ttl` when set; the backend can override
/// it per response via the expiry header. An unparseable override is a
/// warning, not an error.
///
/// Signing failure is fatal for the response: the caller must not relay a
/// half-issued token.
pub fn maybe_issue_token(
    headers: &mut HeaderMap,
    service: &ServiceDescriptor,
    default_ttl: Duration,
) -> Result<Option<String>, TokenError> {
    if !headers.contains_key(TRIGGER_HEADER) {
        return Ok(None);
    }

    let (claims, expiry_override) = drain_reserved_headers(headers);

    let mut ttl = service.effective_token_ttl(default_ttl);
    if let Some(raw) = expiry_override {
        match duration_format::parse_duration(&raw) {
            Ok(parsed) => ttl = parsed,
            Err(e) => {
                warn!(
                    service = %service.name,
                    value = %raw,
                    error = %e,
                    "Invalid token expiry override, using default window"
                );
            }
        }
    }

    let token = token::sign(&claims, ttl, &service.secret)?;

    debug!(
        service = %service.name,
        claims = claims.len(),
        ttl_secs = ttl.as_secs(),
        "Issued token on backend request"
    );

    Ok(Some(token))
}

/// Remove every reserved header from the map, returning the assembled claim
/// set and the raw expiry override value, if any.
///
/// A claim header appearing once contributes a string value; repeated
/// headers contribute an array of strings. Values that are not valid UTF-8
/// are dropped with a warning.
fn drain_reserved_headers(headers: &mut HeaderMap) -> (ClaimSet, Option<String>) {
    let reserved: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_reserved(name))
        .cloned()
        .collect();

    let mut claims = ClaimSet::new();
    let mut expiry_override = None;

    for name in reserved {
        let values: Vec<HeaderValue> = headers.get_all(&name).iter().cloned().collect();
        headers.remove(&name);

        match classify(&name) {
            Some(ReservedHeader::Trigger) => {} // presence already consumed
            Some(ReservedHeader::Expiry) => {
                // First value wins, matching multi-value claim ordering
                expiry_override = values
                    .first()
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
            }
            Some(ReservedHeader::Claim(key)) => {
                let mut strings: Vec<String> = Vec::with_capacity(values.len());
                for value in &values {
                    match value.to_str() {
                        Ok(s) => strings.push(s.to_string()),
                        Err(_) => {
                            warn!(header = %name, "Dropping non-UTF-8 claim header value");
                        }
                    }
                }
                match strings.len() {
                    0 => {}
                    1 => {
                        claims.insert(key, Value::from(strings.remove(0)));
                    }
                    _ => {
                        claims.insert(key, Value::from(strings));
                    }
                }
            }
            // Bare prefix or empty key: reserved, stripped, no claim
            None => {}
        }
    }

    (claims, expiry_override)
}
