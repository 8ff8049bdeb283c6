//! Classification of the reserved proxy-token header vocabulary.
//!
//! Backends signal the proxy through response headers under a single
//! reserved prefix. Three subtypes exist: the issuance trigger, the
//! expiration override, and bare claim headers (prefix + arbitrary key).
//! Matching is case-insensitive on the prefix; the `http` crate hands us
//! lowercased names, so the claim key is rebuilt in HTTP canonical (title)
//! casing, which is the form the wire delivered.

use http::HeaderName;

/// Reserved prefix for all backend-to-proxy signaling headers.
pub const RESERVED_PREFIX: &str = "x-proxy-token";

/// Trigger header: presence alone requests token issuance, value ignored.
pub const TRIGGER_HEADER: &str = "x-proxy-token-required";

/// Optional override of the token validity window, as a duration string.
pub const EXPIRY_HEADER: &str = "x-proxy-token-exp";

/// Prefix under which verified claims are forwarded to the backend.
pub const CLAIM_FORWARD_PREFIX: &str = "x-proxy-claim-";

/// Subtypes of the reserved header vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservedHeader {
    /// `X-Proxy-Token-Required`
    Trigger,
    /// `X-Proxy-Token-Exp`
    Expiry,
    /// `X-Proxy-Token-<Key>`, carrying the canonicalized claim key
    Claim(String),
}

/// Whether a header name belongs to the reserved vocabulary.
///
/// The bare prefix and an empty key (`X-Proxy-Token-`) are reserved too:
/// they contribute no claim but must still be stripped before relaying.
pub fn is_reserved(name: &HeaderName) -> bool {
    let name = name.as_str();
    match name.strip_prefix(RESERVED_PREFIX) {
        Some(rest) => rest.is_empty() || rest.starts_with('-'),
        None => false,
    }
}

/// Classify a reserved header into its subtype.
///
/// Returns `None` for names outside the vocabulary and for reserved names
/// with no usable claim key.
pub fn classify(name: &HeaderName) -> Option<ReservedHeader> {
    let name = name.as_str();
    if name == TRIGGER_HEADER {
        return Some(ReservedHeader::Trigger);
    }
    if name == EXPIRY_HEADER {
        return Some(ReservedHeader::Expiry);
    }

    let rest = name.strip_prefix(RESERVED_PREFIX)?;
    let key = rest.strip_prefix('-')?;
    if key.is_empty() {
        return None;
    }
    Some(ReservedHeader::Claim(canonical_claim_key(key)))
}

/// Rebuild a claim key in HTTP canonical casing: the first letter of each
/// `-`-separated segment is uppercased (`org-unit` -> `Org-Unit`).
fn canonical_claim_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut at_segment_start = true;
    for c in key.chars() {
        if c == '-' {
            at_segment_start = true;
            out.push(c);
        } else if at_segment_start {
            out.extend(c.to_uppercase());
            at_segment_start = false;
        } else {
            out.push(c);
        }
    }
    out
}
