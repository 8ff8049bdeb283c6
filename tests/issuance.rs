//! End-to-end tests for the token issuance gate.

mod helpers;

use std::time::Duration;

use helpers::{backend_response, get, spawn_backend, spawn_gateway, spawn_gateway_with_config};
use jsonwebtoken::{decode, get_current_timestamp, Algorithm, DecodingKey, Validation};
use tokengate::config::GatewayConfig;
use tokengate::registry::{ServiceDescriptor, ServiceRegistry};
use tokio::net::TcpListener;

async fn registry_with(descriptor: ServiceDescriptor) -> ServiceRegistry {
    let registry = ServiceRegistry::new();
    registry.insert(descriptor).await;
    registry
}

fn dd_api(backend: &helpers::MockBackend) -> ServiceDescriptor {
    ServiceDescriptor::new("dd-gpi", format!("http://{}", backend.addr), "dd-api", "marshal")
        .secured(vec!["/hash".to_string()])
}

/// Pull the bearer token out of a relayed response.
fn issued_token(response: &helpers::RawResponse) -> String {
    let authorization = response
        .header("authorization")
        .expect("response carries an issued token");
    authorization
        .strip_prefix("Bearer ")
        .expect("issued credential uses the bearer scheme")
        .to_string()
}

/// Decode an issued token's full claim set, exp included.
fn decode_claims(token: &str, secret: &str) -> serde_json::Value {
    decode::<serde_json::Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .expect("issued token verifies against the service secret")
    .claims
}

#[tokio::test]
async fn test_trigger_header_mints_a_bearer_token() {
    let backend = spawn_backend(backend_response(
        "200 OK",
        &[
            ("X-Proxy-Token-Required", "true"),
            ("X-Proxy-Token-Exp", "30m"),
            ("X-Proxy-Token-Role", "admin"),
        ],
        "authenticated",
    ))
    .await;
    let gateway = spawn_gateway(registry_with(dd_api(&backend)).await).await;

    let response = get(gateway.addr, "/dd-api/hash", &[]).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "authenticated");

    // Reserved vocabulary never reaches the client
    assert!(response.header_names_with_prefix("x-proxy-token").is_empty());

    let claims = decode_claims(&issued_token(&response), "marshal");
    assert_eq!(claims["Role"], "admin");

    // The backend's expiry override replaced the default window
    let exp = claims["exp"].as_u64().unwrap();
    let expected = get_current_timestamp() + 30 * 60;
    assert!(exp.abs_diff(expected) <= 5, "exp {} not near {}", exp, expected);
}

#[tokio::test]
async fn test_response_without_trigger_is_relayed_untouched() {
    let backend = spawn_backend(backend_response(
        "200 OK",
        &[
            // Claim-shaped but no trigger: must pass through as-is
            ("X-Proxy-Token-Role", "admin"),
            ("X-Custom", "kept"),
        ],
        "plain",
    ))
    .await;
    let gateway = spawn_gateway(registry_with(dd_api(&backend)).await).await;

    let response = get(gateway.addr, "/dd-api/hash", &[]).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-proxy-token-role"), Some("admin"));
    assert_eq!(response.header("x-custom"), Some("kept"));
    assert!(!response.has_header("authorization"));
}

#[tokio::test]
async fn test_unparseable_expiry_override_falls_back_to_default() {
    let backend = spawn_backend(backend_response(
        "200 OK",
        &[
            ("X-Proxy-Token-Required", "true"),
            ("X-Proxy-Token-Exp", "sometime later"),
        ],
        "ok",
    ))
    .await;
    let config = GatewayConfig {
        token_ttl: Duration::from_secs(600),
        ..GatewayConfig::default()
    };
    let gateway = spawn_gateway_with_config(registry_with(dd_api(&backend)).await, config).await;

    let response = get(gateway.addr, "/dd-api/hash", &[]).await;

    assert_eq!(response.status, 200);
    let claims = decode_claims(&issued_token(&response), "marshal");
    let exp = claims["exp"].as_u64().unwrap();
    let expected = get_current_timestamp() + 600;
    assert!(exp.abs_diff(expected) <= 5, "exp {} not near {}", exp, expected);
}

#[tokio::test]
async fn test_service_ttl_overrides_deployment_default() {
    let backend = spawn_backend(backend_response(
        "200 OK",
        &[("X-Proxy-Token-Required", "true")],
        "ok",
    ))
    .await;
    let descriptor = dd_api(&backend).with_token_ttl(Duration::from_secs(90));
    let gateway = spawn_gateway(registry_with(descriptor).await).await;

    let response = get(gateway.addr, "/dd-api/hash", &[]).await;

    let claims = decode_claims(&issued_token(&response), "marshal");
    let exp = claims["exp"].as_u64().unwrap();
    let expected = get_current_timestamp() + 90;
    assert!(exp.abs_diff(expected) <= 5, "exp {} not near {}", exp, expected);
}

#[tokio::test]
async fn test_repeated_claim_headers_issue_an_array_claim() {
    let backend = spawn_backend(backend_response(
        "200 OK",
        &[
            ("X-Proxy-Token-Required", "true"),
            ("X-Proxy-Token-Scope", "read"),
            ("X-Proxy-Token-Scope", "write"),
        ],
        "ok",
    ))
    .await;
    let gateway = spawn_gateway(registry_with(dd_api(&backend)).await).await;

    let response = get(gateway.addr, "/dd-api/hash", &[]).await;

    let claims = decode_claims(&issued_token(&response), "marshal");
    assert_eq!(claims["Scope"], serde_json::json!(["read", "write"]));
}

#[tokio::test]
async fn test_unreachable_backend_maps_to_502() {
    // Bind and immediately drop a listener so the port refuses connections
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = registry_with(ServiceDescriptor::new(
        "App1",
        format!("http://{}", dead_addr),
        "app1",
        "",
    ))
    .await;
    let gateway = spawn_gateway(registry).await;

    let response = get(gateway.addr, "/app1/status", &[]).await;

    assert_eq!(response.status, 502);
}
