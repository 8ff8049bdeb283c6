//! Authorization Decision Engine.
//!
//! Gates every inbound request against the resolved service descriptor:
//! unsecured services and public routes pass unconditionally; everything
//! else must present a bearer token that verifies against the service's
//! secret. The decision is a pure function of the request headers, path,
//! and descriptor - no shared state, no retries.

pub mod headers;
pub mod issuer;
pub mod token;

use std::fmt;

use http::header::AUTHORIZATION;
use http::HeaderMap;
use tracing::debug;

use crate::registry::ServiceDescriptor;
use token::{ClaimSet, TokenError};

/// Outcome of the authorization gate.
#[derive(Debug)]
pub enum Decision {
    /// The request may pass; `claims` carries the verified token's claim set
    /// when a credential was checked (public routes and unsecured services
    /// pass with no claims).
    Allow { claims: Option<ClaimSet> },
    /// The request is rejected. The reason is for logs only; clients see a
    /// bare 401 either way.
    Deny { reason: DenyReason },
}

impl Decision {
    fn allow_anonymous() -> Self {
        Decision::Allow { claims: None }
    }
}

/// Why a request was denied, kept internal for observability.
#[derive(Debug)]
pub enum DenyReason {
    /// No `Authorization` header at all
    MissingCredentials,
    /// Candidates existed but none verified; retains the last verification
    /// error seen across the bearer values
    NoVerifiableToken { last_error: Option<TokenError> },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::MissingCredentials => write!(f, "no authorization header"),
            DenyReason::NoVerifiableToken { last_error: None } => {
                write!(f, "no bearer credential among authorization values")
            }
            DenyReason::NoVerifiableToken {
                last_error: Some(e),
            } => write!(f, "no verifiable bearer credential (last error: {})", e),
        }
    }
}

/// Decide whether a request may pass to the given service.
///
/// `request_path` is the full inbound path (`/<alias>/...`); public-route
/// entries are compared as `"/" + alias + entry`, exactly, with no
/// normalization - the entry must carry its own leading `/`.
///
/// Every `Authorization` value is considered in order: values that are not
/// bearer-shaped are skipped silently, verification failures are skipped
/// too, and the first token that verifies wins. Only exhaustion denies.
pub fn authorize(
    service: &ServiceDescriptor,
    request_headers: &HeaderMap,
    request_path: &str,
) -> Decision {
    if !service.secured {
        return Decision::allow_anonymous();
    }

    for route in &service.public_routes {
        let full_route = format!("/{}{}", service.path_alias, route);
        if full_route == request_path {
            debug!(service = %service.name, route = %route, "Public route, bypassing authorization");
            return Decision::allow_anonymous();
        }
    }

    if request_headers.get(AUTHORIZATION).is_none() {
        return Decision::Deny {
            reason: DenyReason::MissingCredentials,
        };
    }

    let mut last_error = None;
    for value in request_headers.get_all(AUTHORIZATION) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let Some((scheme, credential)) = value.split_once(' ') else {
            continue;
        };
        if !scheme.eq_ignore_ascii_case("bearer") {
            continue;
        }

        match token::verify(credential, &service.secret) {
            Ok(claims) => {
                return Decision::Allow {
                    claims: Some(claims),
                }
            }
            Err(e) => {
                debug!(service = %service.name, error = %e, "Bearer candidate failed verification");
                last_error = Some(e);
            }
        }
    }

    Decision::Deny {
        reason: DenyReason::NoVerifiableToken { last_error },
    }
}
