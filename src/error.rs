//! Error types for the gateway request pipeline.
//!
//! Every error that can occur while handling a request is converted to an
//! HTTP response at the connection boundary via [`GatewayError::to_response`];
//! nothing propagates past it and nothing is retried.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use thiserror::Error;

use crate::auth::token::TokenError;

/// Errors that can occur during gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No enabled service is registered under the requested alias (maps to 400)
    #[error("no service registered for alias '{0}'")]
    UnknownService(String),

    /// The authorization gate denied the request (maps to 401).
    ///
    /// Deliberately carries no detail: clients must not be able to tell a
    /// missing credential from an invalid one. The distinction is logged at
    /// the gate instead.
    #[error("request not authorized")]
    Unauthorized,

    /// Token signing failed while the backend requested issuance (maps to 500)
    #[error("token issuance failed: {0}")]
    Issuance(#[from] TokenError),

    /// The upstream target URI could not be built (maps to 400)
    #[error("invalid upstream URI: {0}")]
    InvalidUri(String),

    /// Connection error to upstream (maps to 502)
    #[error("upstream connection error: {0}")]
    Connection(String),

    /// Upstream did not respond within the request timeout (maps to 504)
    #[error("upstream timeout: {0}")]
    Timeout(String),
}

impl GatewayError {
    /// Convert the error to an HTTP response with the appropriate status code.
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let (status, message) = match self {
            GatewayError::UnknownService(_) => {
                (StatusCode::BAD_REQUEST, "Service not registered")
            }
            // Empty body: do not leak why authorization failed
            GatewayError::Unauthorized => (StatusCode::UNAUTHORIZED, ""),
            GatewayError::Issuance(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error",
            ),
            GatewayError::InvalidUri(_) => (StatusCode::BAD_REQUEST, "400 Bad Request"),
            GatewayError::Connection(_) => (
                StatusCode::BAD_GATEWAY,
                "502 Bad Gateway\n\nFailed to connect to upstream server.",
            ),
            GatewayError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "504 Gateway Timeout\n\nUpstream server did not respond in time.",
            ),
        };

        Response::builder()
            .status(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from(message)))
            .unwrap_or_else(|_| {
                let mut resp = Response::new(Full::new(Bytes::from("500 Internal Server Error")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                resp
            })
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
