//! Tower layer for structured request/response logging.
//!
//! Uses `tower_http::trace::TraceLayer` for the middleware plumbing, with
//! custom callbacks that attach a correlation id to every request span and
//! redact credential-bearing headers from log output.

use http::HeaderMap;
use std::fmt;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::headers::RESERVED_PREFIX;

/// Headers that are redacted from logs.
///
/// `Authorization` carries both inbound credentials and freshly issued
/// tokens; the reserved proxy-token vocabulary is redacted as a prefix
/// match in [`SanitizedHeaders`].
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
    "set-cookie",
];

/// Create the logging/tracing layer.
pub fn logging_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    CorrelationMakeSpan,
    OnRequestLogger,
    OnResponseLogger,
    tower_http::trace::DefaultOnBodyChunk,
    tower_http::trace::DefaultOnEos,
    OnFailureLogger,
> {
    TraceLayer::new_for_http()
        .make_span_with(CorrelationMakeSpan)
        .on_request(OnRequestLogger)
        .on_response(OnResponseLogger)
        .on_failure(OnFailureLogger)
}

/// Span creator that attaches a correlation id to every request span.
///
/// Uses `x-request-id` from the request when present, otherwise generates
/// one, so every log line within a request's lifecycle carries a
/// `request_id` field.
#[derive(Clone, Debug)]
pub struct CorrelationMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for CorrelationMakeSpan {
    fn make_span(&mut self, request: &hyper::Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

/// On-request callback: logs method and URI, headers at DEBUG.
#[derive(Clone, Debug)]
pub struct OnRequestLogger;

impl<B> tower_http::trace::OnRequest<B> for OnRequestLogger {
    fn on_request(&mut self, request: &hyper::Request<B>, _span: &tracing::Span) {
        info!(
            method = %request.method(),
            uri = %request.uri(),
            direction = "inbound",
            "Request received"
        );

        // Header sanitization allocates; only pay for it at DEBUG
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                headers = ?sanitize_headers(request.headers()),
                "Request details"
            );
        }
    }
}

/// On-response callback: logs status and latency, headers at DEBUG.
#[derive(Clone, Debug)]
pub struct OnResponseLogger;

impl<B> tower_http::trace::OnResponse<B> for OnResponseLogger {
    fn on_response(
        self,
        response: &hyper::Response<B>,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        info!(
            status = %response.status().as_u16(),
            latency_ms = latency.as_millis(),
            direction = "outbound",
            "Response sent"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                headers = ?sanitize_headers(response.headers()),
                "Response details"
            );
        }
    }
}

/// On-failure callback: logs service errors.
#[derive(Clone, Debug)]
pub struct OnFailureLogger;

impl tower_http::trace::OnFailure<tower_http::classify::ServerErrorsFailureClass>
    for OnFailureLogger
{
    fn on_failure(
        &mut self,
        failure: tower_http::classify::ServerErrorsFailureClass,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis(),
            direction = "error",
            "Request failed"
        );
    }
}

/// Zero-allocation wrapper rendering headers with credentials redacted.
struct SanitizedHeaders<'a>(&'a HeaderMap);

impl<'a> fmt::Debug for SanitizedHeaders<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();

        // Bound formatting work on hostile inputs
        const MAX_HEADERS_TO_LOG: usize = 50;
        const MAX_VALUE_LEN: usize = 1024;

        for (idx, (name, value)) in self.0.iter().enumerate() {
            if idx >= MAX_HEADERS_TO_LOG {
                map.entry(&"...", &format!("({} more headers)", self.0.len() - idx));
                break;
            }

            let name_str = name.as_str();
            let is_sensitive = SENSITIVE_HEADERS
                .iter()
                .any(|&sensitive| name_str.eq_ignore_ascii_case(sensitive))
                || name_str.starts_with(RESERVED_PREFIX);

            if is_sensitive {
                map.entry(&name_str, &"[REDACTED]");
            } else {
                match value.to_str() {
                    Ok(val_str) if val_str.len() <= MAX_VALUE_LEN => {
                        map.entry(&name_str, &val_str);
                    }
                    Ok(val_str) => {
                        map.entry(
                            &name_str,
                            &format!("{}... ({} bytes)", &val_str[..MAX_VALUE_LEN], val_str.len()),
                        );
                    }
                    Err(_) => {
                        map.entry(&name_str, &format!("<binary: {} bytes>", value.len()));
                    }
                }
            }
        }

        map.finish()
    }
}

/// Create a sanitized headers wrapper for debug logging.
#[inline]
fn sanitize_headers(headers: &HeaderMap) -> SanitizedHeaders<'_> {
    SanitizedHeaders(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_credentials_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("x-proxy-token-role", HeaderValue::from_static("admin"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let rendered = format!("{:?}", sanitize_headers(&headers));
        assert!(!rendered.contains("Bearer secret"));
        assert!(!rendered.contains("admin"));
        assert!(rendered.contains("text/plain"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
