//! Core gateway service implementation.
//!
//! # Overview
//!
//! GatewayService is the entry point for all inbound traffic. Each request
//! runs the same pipeline:
//!
//! ```text
//! Request<Incoming> ──► alias split ──► registry resolve (400 on miss)
//!                                              │
//!                                              ▼
//!                                     authorization gate (401 on deny)
//!                                              │ allow (+ verified claims)
//!                                              ▼
//!                              zero-copy forward to service base_url
//!                                              │
//!                                              ▼
//!                              token issuance gate (500 on sign failure)
//!                                              │
//!                                              ▼
//!                        relay status/headers/body, bearer token appended
//! ```
//!
//! The request body streams through untouched; only headers are inspected
//! and rewritten.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, BodyStream, StreamBody};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use tower::Service;
use tracing::{debug, error, info, warn};

use crate::auth::headers::CLAIM_FORWARD_PREFIX;
use crate::auth::token::{ClaimSet, TokenError};
use crate::auth::{self, issuer, Decision};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::registry::ServiceRegistry;
use crate::router;

/// Type alias for the client's streaming body type.
type ClientBody = BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Unified response body type relayed to clients.
pub type GatewayBody = BoxBody<Bytes, GatewayError>;

/// Main gateway service: authorization gate, forwarding, issuance gate.
#[derive(Clone)]
pub struct GatewayService {
    /// HTTPS-capable pooled client for upstream connections
    client: Client<HttpsConnector<HttpConnector>, ClientBody>,
    registry: Arc<ServiceRegistry>,
    config: GatewayConfig,
}

impl GatewayService {
    /// Create a new gateway service over the given registry.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Connection` if the rustls crypto provider
    /// cannot be installed or native TLS roots cannot be loaded.
    pub fn new(registry: Arc<ServiceRegistry>, config: GatewayConfig) -> GatewayResult<Self> {
        // Install the default crypto provider exactly once; later calls
        // observe the captured result instead of panicking.
        static RUSTLS_INIT: std::sync::OnceLock<Result<(), ()>> = std::sync::OnceLock::new();
        let init_result = RUSTLS_INIT.get_or_init(|| {
            rustls::crypto::ring::default_provider()
                .install_default()
                .map_err(|_| ())
        });
        if init_result.is_err() {
            return Err(GatewayError::Connection(
                "Failed to install rustls crypto provider".into(),
            ));
        }

        let mut http_connector = HttpConnector::new();
        http_connector.set_nodelay(config.tcp_nodelay);

        let https_connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| GatewayError::Connection(format!("Failed to load native TLS roots: {}", e)))?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .http1_title_case_headers(true)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .build(https_connector);

        Ok(Self {
            client,
            registry,
            config,
        })
    }

    /// Run the full pipeline for one inbound request.
    pub async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> GatewayResult<Response<GatewayBody>> {
        let target = router::split_target(req.uri());
        let alias = target.alias.to_string();
        let upstream_path_and_query = target.upstream_path_and_query();

        let service = self
            .registry
            .resolve(&alias)
            .await
            .ok_or_else(|| GatewayError::UnknownService(alias.clone()))?;

        let claims = match auth::authorize(&service, req.headers(), req.uri().path()) {
            Decision::Allow { claims } => claims,
            Decision::Deny { reason } => {
                warn!(
                    alias = %alias,
                    service = %service.name,
                    reason = %reason,
                    "Request denied at authorization gate"
                );
                return Err(GatewayError::Unauthorized);
            }
        };

        let upstream_uri: Uri = format!(
            "{}{}",
            service.base_url.trim_end_matches('/'),
            upstream_path_and_query
        )
        .parse()
        .map_err(|e| GatewayError::InvalidUri(format!("{}", e)))?;

        info!(
            method = %req.method(),
            uri = %req.uri(),
            target = %upstream_uri,
            service = %service.name,
            "Proxying request"
        );

        // Split request into parts and body
        let (parts, incoming_body) = req.into_parts();

        let mut upstream_req = Request::builder()
            .method(parts.method.clone())
            .uri(&upstream_uri);

        let headers = upstream_req.headers_mut().ok_or_else(|| {
            error!("Failed to get mutable headers from request builder");
            GatewayError::Connection("Request builder in invalid state".to_string())
        })?;
        copy_request_headers(parts.headers, headers);

        // Verified claims travel to the backend under the claim-forward
        // prefix; inbound headers under that prefix were dropped above so
        // clients cannot smuggle claims past the gate.
        if let Some(claims) = &claims {
            forward_claims(headers, claims);
        }

        // Convert Incoming body to zero-copy streaming body
        let body_stream = BodyStream::new(incoming_body);
        let mapped_stream = body_stream.map(|result| {
            result.map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                Box::new(std::io::Error::other(format!("Body stream error: {}", e)))
            })
        });
        let boxed_body: ClientBody = BodyExt::boxed(StreamBody::new(mapped_stream));

        let upstream_req = upstream_req.body(boxed_body).map_err(|e| {
            error!(error = %e, "Failed to build upstream request");
            GatewayError::Connection(format!("Failed to build request: {}", e))
        })?;

        // Single attempt, bounded by the configured upstream timeout
        let upstream_res = tokio::time::timeout(
            self.config.upstream_timeout,
            self.client.request(upstream_req),
        )
        .await
        .map_err(|_| {
            warn!(target = %upstream_uri, "Upstream request timed out");
            GatewayError::Timeout(format!(
                "no response within {}s",
                self.config.upstream_timeout.as_secs()
            ))
        })?
        .map_err(map_client_error)?;

        let (mut res_parts, res_body) = upstream_res.into_parts();
        strip_hop_by_hop(&mut res_parts.headers);

        // Issuance gate: runs before generic header relay so the reserved
        // vocabulary never leaks to the client
        if let Some(token) =
            issuer::maybe_issue_token(&mut res_parts.headers, &service, self.config.token_ttl)?
        {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                GatewayError::Issuance(TokenError::Signing(
                    "issued token is not a valid header value".into(),
                ))
            })?;
            res_parts.headers.append(AUTHORIZATION, value);
            debug!(service = %service.name, "Appended issued bearer token to response");
        }

        let body = res_body
            .map_err(|e| GatewayError::Connection(format!("Upstream body error: {}", e)))
            .boxed();

        Ok(Response::from_parts(res_parts, body))
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<GatewayBody>;
    type Error = GatewayError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.handle_request(req).await })
    }
}

/// Copy inbound request headers to the upstream request, dropping hop-by-hop
/// headers and anything under the claim-forward prefix.
fn copy_request_headers(source: HeaderMap, dest: &mut HeaderMap) {
    let mut last_name: Option<HeaderName> = None;
    for (name_opt, value) in source {
        // The iterator yields None for subsequent values of a repeated name
        let Some(name) = name_opt.or_else(|| last_name.clone()) else {
            continue;
        };
        last_name = Some(name.clone());

        if is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        if name.as_str().starts_with(CLAIM_FORWARD_PREFIX) {
            debug!(header = %name, "Dropping spoofed claim-forward header from client");
            continue;
        }
        dest.append(name, value);
    }
}

/// Attach verified claims to the upstream request as claim-forward headers.
///
/// String claims map to one header, array claims to one header per element.
/// Claim keys that do not form a valid header name are dropped with a
/// warning rather than failing the request.
fn forward_claims(headers: &mut HeaderMap, claims: &ClaimSet) {
    for (key, value) in claims {
        let name = match HeaderName::from_bytes(format!("{}{}", CLAIM_FORWARD_PREFIX, key).as_bytes())
        {
            Ok(name) => name,
            Err(_) => {
                warn!(claim = %key, "Claim key is not a valid header name, not forwarding");
                continue;
            }
        };

        let rendered: Vec<String> = match value {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Value::String(s) => vec![s.clone()],
            other => vec![other.to_string()],
        };

        for item in rendered {
            match HeaderValue::from_str(&item) {
                Ok(header_value) => {
                    headers.append(name.clone(), header_value);
                }
                Err(_) => {
                    warn!(claim = %key, "Claim value is not a valid header value, not forwarding");
                }
            }
        }
    }
}

/// Remove hop-by-hop headers from a response before relaying it.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let hop_by_hop: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()))
        .cloned()
        .collect();
    for name in hop_by_hop {
        headers.remove(name);
    }
}

/// Check if a header is a hop-by-hop header that shouldn't be forwarded.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Classify an upstream client error.
fn map_client_error(e: hyper_util::client::legacy::Error) -> GatewayError {
    if e.is_connect() {
        warn!(error = %e, "Failed to connect to upstream");
        GatewayError::Connection(format!("Failed to connect to upstream: {}", e))
    } else {
        error!(error = %e, "Upstream request failed");
        GatewayError::Connection(format!("Upstream request failed: {}", e))
    }
}
