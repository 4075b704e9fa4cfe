//! Backend REST client.
//!
//! JSON over HTTPS. Only a handful of response fields are consumed:
//! `device_id`, `free_credits`, `is_active` and `valid`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use crate::cache::AccountSnapshot;
use crate::error::{AccountError, AccountResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;

// =============================================================================
// Wire Types
// =============================================================================

/// Device state returned by every device endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    #[serde(default)]
    pub free_credits: u32,
    /// License active flag
    #[serde(default)]
    pub is_active: bool,
}

impl DeviceStatus {
    pub fn into_snapshot(self) -> AccountSnapshot {
        AccountSnapshot::new(self.device_id, self.free_credits, self.is_active)
    }
}

/// Partial device update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateDeviceRequest<'a> {
    device_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ValidateLicenseRequest<'a> {
    license_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateLicenseResponse {
    valid: bool,
}

// =============================================================================
// Client Trait
// =============================================================================

/// Operations the account layer needs from the backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// `GET /v1/devices/{id}`. `NotFound` if the device is unknown.
    async fn get_device(&self, device_id: &str) -> AccountResult<DeviceStatus>;

    /// `POST /v1/devices`
    async fn create_device(&self, device_id: &str) -> AccountResult<DeviceStatus>;

    /// `PATCH /v1/devices/{id}`
    async fn update_device(
        &self,
        device_id: &str,
        update: &DeviceUpdate,
    ) -> AccountResult<DeviceStatus>;

    /// `POST /v1/devices/{id}/credits/decrement`
    async fn decrement_credit(&self, device_id: &str) -> AccountResult<DeviceStatus>;

    /// `POST /v1/licenses/validate`
    async fn validate_license(&self, license_key: &str) -> AccountResult<bool>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Backend client configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Create config from environment variables.
    ///
    /// Returns `None` when `CLIPDL_BACKEND_URL` is unset or empty; the
    /// pipeline then runs without account checks.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("CLIPDL_BACKEND_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())?;

        let timeout_secs: u64 = std::env::var("CLIPDL_BACKEND_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        let connect_timeout_secs: u64 = std::env::var("CLIPDL_BACKEND_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Some(Self {
            api_key: std::env::var("CLIPDL_BACKEND_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            ..Self::new(base_url)
        })
    }
}

// =============================================================================
// HTTP Client
// =============================================================================

/// reqwest-backed [`BackendClient`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> AccountResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("clipdl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AccountError::NetworkTransient(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Send a request and decode a JSON body, mapping failures to [`AccountError`].
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> AccountResult<T> {
        let span = info_span!("backend_request", operation = operation);

        async {
            let started = Instant::now();
            let response = match self.authorize(request).send().await {
                Ok(r) => r,
                Err(e) => {
                    record_request(operation, 0, started.elapsed().as_secs_f64() * 1000.0);
                    return Err(AccountError::from(e));
                }
            };

            let status = response.status();
            record_request(
                operation,
                status.as_u16(),
                started.elapsed().as_secs_f64() * 1000.0,
            );
            debug!(status = status.as_u16(), "Backend responded");

            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(|e| AccountError::invalid_response(format!("{}: {}", operation, e)));
            }

            Err(Self::error_from_response(operation, status, response).await)
        }
        .instrument(span)
        .await
    }

    async fn error_from_response(
        operation: &str,
        status: StatusCode,
        response: reqwest::Response,
    ) -> AccountError {
        let retry_after_ms = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000));

        let body = response.text().await.unwrap_or_default();
        match AccountError::from_http_status(status.as_u16(), format!("{} failed: {}", operation, body)) {
            AccountError::RateLimited { .. } => AccountError::RateLimited { retry_after_ms },
            other => other,
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn get_device(&self, device_id: &str) -> AccountResult<DeviceStatus> {
        let request = self.http.get(self.url(&format!("/v1/devices/{}", device_id)));
        self.execute("get_device", request).await
    }

    async fn create_device(&self, device_id: &str) -> AccountResult<DeviceStatus> {
        let request = self
            .http
            .post(self.url("/v1/devices"))
            .json(&CreateDeviceRequest { device_id });
        self.execute("create_device", request).await
    }

    async fn update_device(
        &self,
        device_id: &str,
        update: &DeviceUpdate,
    ) -> AccountResult<DeviceStatus> {
        let request = self
            .http
            .patch(self.url(&format!("/v1/devices/{}", device_id)))
            .json(update);
        self.execute("update_device", request).await
    }

    async fn decrement_credit(&self, device_id: &str) -> AccountResult<DeviceStatus> {
        let request = self
            .http
            .post(self.url(&format!("/v1/devices/{}/credits/decrement", device_id)))
            .json(&serde_json::json!({}));
        self.execute("decrement_credit", request).await
    }

    async fn validate_license(&self, license_key: &str) -> AccountResult<bool> {
        let request = self
            .http
            .post(self.url("/v1/licenses/validate"))
            .json(&ValidateLicenseRequest { license_key });
        let response: ValidateLicenseResponse = self.execute("validate_license", request).await?;
        Ok(response.valid)
    }
}
