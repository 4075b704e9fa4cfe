//! Tests for the HTTP backend client.

use std::time::Duration;

use serial_test::serial;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::backend::{BackendClient, BackendConfig, DeviceUpdate, HttpBackend};
use crate::error::AccountError;

// =============================================================================
// Test Helpers
// =============================================================================

fn backend_for(server: &MockServer) -> HttpBackend {
    let mut config = BackendConfig::new(server.uri());
    config.timeout = Duration::from_secs(2);
    HttpBackend::new(config).unwrap()
}

fn device_json(credits: u32, active: bool) -> serde_json::Value {
    serde_json::json!({
        "device_id": "dev-1",
        "free_credits": credits,
        "is_active": active,
        "created_at": "2026-01-01T00:00:00Z"
    })
}

// =============================================================================
// Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_get_device() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_json(3, false)))
        .expect(1)
        .mount(&server)
        .await;

    let status = backend_for(&server).get_device("dev-1").await.unwrap();
    assert_eq!(status.device_id, "dev-1");
    assert_eq!(status.free_credits, 3);
    assert!(!status.is_active);
}

#[tokio::test]
async fn test_get_device_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such device"))
        .mount(&server)
        .await;

    let err = backend_for(&server).get_device("missing").await.unwrap_err();
    assert!(matches!(err, AccountError::NotFound(_)));
}

#[tokio::test]
async fn test_create_device_posts_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/devices"))
        .and(body_json(serde_json::json!({ "device_id": "dev-1" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(device_json(5, false)))
        .expect(1)
        .mount(&server)
        .await;

    let status = backend_for(&server).create_device("dev-1").await.unwrap();
    assert_eq!(status.free_credits, 5);
}

#[tokio::test]
async fn test_update_device_sends_license() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/v1/devices/dev-1"))
        .and(body_json(serde_json::json!({ "license_key": "KEY-123" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_json(0, true)))
        .mount(&server)
        .await;

    let update = DeviceUpdate {
        license_key: Some("KEY-123".to_string()),
    };
    let status = backend_for(&server).update_device("dev-1", &update).await.unwrap();
    assert!(status.is_active);
}

#[tokio::test]
async fn test_decrement_credit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/dev-1/credits/decrement"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_json(2, false)))
        .mount(&server)
        .await;

    let status = backend_for(&server).decrement_credit("dev-1").await.unwrap();
    assert_eq!(status.free_credits, 2);
}

#[tokio::test]
async fn test_validate_license() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/validate"))
        .and(body_json(serde_json::json!({ "license_key": "GOOD" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "valid": true })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/licenses/validate"))
        .and(body_json(serde_json::json!({ "license_key": "BAD" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "valid": false })))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    assert!(backend.validate_license("GOOD").await.unwrap());
    assert!(!backend.validate_license("BAD").await.unwrap());
}

// =============================================================================
// Error Mapping Tests
// =============================================================================

#[tokio::test]
async fn test_rate_limit_reads_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
        .mount(&server)
        .await;

    let err = backend_for(&server).get_device("dev-1").await.unwrap_err();
    assert!(matches!(
        err,
        AccountError::RateLimited {
            retry_after_ms: Some(2000)
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = backend_for(&server).get_device("dev-1").await.unwrap_err();
    assert!(matches!(err, AccountError::NetworkTransient(_)));
}

#[tokio::test]
async fn test_client_error_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = backend_for(&server).get_device("dev-1").await.unwrap_err();
    assert!(matches!(err, AccountError::NetworkPermanent { status: 403, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = backend_for(&server).get_device("dev-1").await.unwrap_err();
    assert!(matches!(err, AccountError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    // Reserve a free port, then close it so nothing is listening
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let backend = HttpBackend::new(BackendConfig::new(format!("http://127.0.0.1:{port}"))).unwrap();

    let err = backend.get_device("dev-1").await.unwrap_err();
    assert!(matches!(err, AccountError::NetworkTransient(_)), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_bearer_token_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_json(1, false)))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = BackendConfig::new(server.uri());
    config.api_key = Some("secret".to_string());
    HttpBackend::new(config)
        .unwrap()
        .get_device("dev-1")
        .await
        .unwrap();
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
#[serial]
fn test_config_from_env_requires_url() {
    std::env::remove_var("CLIPDL_BACKEND_URL");
    assert!(BackendConfig::from_env().is_none());
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    std::env::set_var("CLIPDL_BACKEND_URL", "https://backend.test/");
    std::env::remove_var("CLIPDL_BACKEND_TIMEOUT_SECS");
    std::env::remove_var("CLIPDL_BACKEND_API_KEY");

    let config = BackendConfig::from_env().unwrap();
    assert_eq!(config.base_url, "https://backend.test");
    assert_eq!(config.timeout, Duration::from_secs(15));
    assert!(config.api_key.is_none());

    std::env::remove_var("CLIPDL_BACKEND_URL");
}
