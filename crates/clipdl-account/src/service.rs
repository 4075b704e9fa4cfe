//! Account service.
//!
//! Combines the backend client, the account cache and the credential store
//! into the operations the pipeline needs: gating job starts, recording
//! credit use and activating licenses.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{BackendClient, DeviceUpdate};
use crate::cache::{AccountCache, AccountSnapshot};
use crate::credentials::{self, CredentialStore};
use crate::error::{AccountError, AccountResult};
use crate::retry::{with_retry, RetryConfig};

/// Account operations backed by a remote service.
#[derive(Clone)]
pub struct AccountService {
    backend: Arc<dyn BackendClient>,
    cache: Arc<AccountCache>,
    credentials: Arc<dyn CredentialStore>,
    retry: RetryConfig,
}

impl AccountService {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        cache: Arc<AccountCache>,
        credentials: Arc<dyn CredentialStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            credentials,
            retry,
        }
    }

    pub fn cache(&self) -> &Arc<AccountCache> {
        &self.cache
    }

    /// Current account state.
    ///
    /// Served from the cache unless `force_refresh`. A device unknown to the
    /// backend is registered on the spot.
    pub async fn snapshot(
        &self,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> AccountResult<AccountSnapshot> {
        if !force_refresh {
            if let Some((snapshot, _age)) = self.cache.get(None).await {
                return Ok(snapshot);
            }
        }

        let device_id = credentials::device_id(self.credentials.as_ref()).await?;

        let status = match with_retry(&self.retry, "get_device", cancel, || {
            self.backend.get_device(&device_id)
        })
        .await
        {
            Ok(status) => status,
            Err(AccountError::NotFound(_)) => {
                info!(device_id = %device_id, "Registering device with backend");
                with_retry(&self.retry, "create_device", cancel, || {
                    self.backend.create_device(&device_id)
                })
                .await?
            }
            Err(e) => return Err(e),
        };

        let snapshot = status.into_snapshot();
        self.cache.put(snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Fail with `NoCreditsRemaining` unless the account may start a job.
    pub async fn ensure_can_start(&self, cancel: &CancellationToken) -> AccountResult<AccountSnapshot> {
        let snapshot = self.snapshot(false, cancel).await?;
        if snapshot.can_start_job() {
            Ok(snapshot)
        } else {
            Err(AccountError::NoCreditsRemaining)
        }
    }

    /// Consume one credit after a completed job.
    ///
    /// Licensed accounts are not metered and return `None`. Otherwise the
    /// cached count is decremented before the backend call and reconciled
    /// to the server's value afterwards; on failure the cache is
    /// invalidated so the next read refetches.
    pub async fn record_credit_use(&self, cancel: &CancellationToken) -> AccountResult<Option<u32>> {
        let snapshot = self.snapshot(false, cancel).await?;
        if snapshot.license_active {
            return Ok(None);
        }

        self.cache
            .update_credits(snapshot.free_credits.saturating_sub(1))
            .await;

        match with_retry(&self.retry, "decrement_credit", cancel, || {
            self.backend.decrement_credit(&snapshot.device_id)
        })
        .await
        {
            Ok(status) => {
                self.cache.update_credits(status.free_credits).await;
                info!(
                    device_id = %snapshot.device_id,
                    free_credits = status.free_credits,
                    "Credit consumed"
                );
                Ok(Some(status.free_credits))
            }
            Err(e) => {
                warn!(
                    device_id = %snapshot.device_id,
                    error = %e,
                    "Credit decrement failed, invalidating account cache"
                );
                self.cache.invalidate().await;
                Err(e)
            }
        }
    }

    /// Validate and apply a license key.
    pub async fn activate_license(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> AccountResult<AccountSnapshot> {
        let key = key.trim();
        if key.is_empty() {
            return Err(AccountError::InvalidLicense);
        }

        let valid = with_retry(&self.retry, "validate_license", cancel, || {
            self.backend.validate_license(key)
        })
        .await?;
        if !valid {
            return Err(AccountError::InvalidLicense);
        }

        credentials::store_license_key(self.credentials.as_ref(), key).await?;

        let device_id = credentials::device_id(self.credentials.as_ref()).await?;
        let update = DeviceUpdate {
            license_key: Some(key.to_string()),
        };
        let status = with_retry(&self.retry, "update_device", cancel, || {
            self.backend.update_device(&device_id, &update)
        })
        .await?;

        self.cache.invalidate().await;
        info!(device_id = %device_id, license_active = status.is_active, "License activated");
        Ok(status.into_snapshot())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceStatus;
    use crate::credentials::{MemoryCredentialStore, DEVICE_ID_KEY, LICENSE_KEY_KEY};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted backend keeping one device in memory.
    #[derive(Default)]
    struct FakeBackend {
        device: Mutex<Option<DeviceStatus>>,
        get_calls: AtomicU32,
        decrement_failures: AtomicU32,
        decrement_calls: AtomicU32,
    }

    impl FakeBackend {
        fn with_device(credits: u32, active: bool) -> Self {
            let backend = Self::default();
            *backend.device.lock().unwrap() = Some(DeviceStatus {
                device_id: "dev-1".to_string(),
                free_credits: credits,
                is_active: active,
            });
            backend
        }

        fn current(&self) -> AccountResult<DeviceStatus> {
            self.device
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AccountError::NotFound("device".into()))
        }
    }

    #[async_trait]
    impl BackendClient for FakeBackend {
        async fn get_device(&self, _device_id: &str) -> AccountResult<DeviceStatus> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            self.current()
        }

        async fn create_device(&self, device_id: &str) -> AccountResult<DeviceStatus> {
            let status = DeviceStatus {
                device_id: device_id.to_string(),
                free_credits: 3,
                is_active: false,
            };
            *self.device.lock().unwrap() = Some(status.clone());
            Ok(status)
        }

        async fn update_device(
            &self,
            _device_id: &str,
            update: &DeviceUpdate,
        ) -> AccountResult<DeviceStatus> {
            let mut device = self.device.lock().unwrap();
            let status = device
                .as_mut()
                .ok_or_else(|| AccountError::NotFound("device".into()))?;
            status.is_active = update.license_key.is_some();
            Ok(status.clone())
        }

        async fn decrement_credit(&self, _device_id: &str) -> AccountResult<DeviceStatus> {
            self.decrement_calls.fetch_add(1, Ordering::SeqCst);
            if self.decrement_failures.load(Ordering::SeqCst) > 0 {
                self.decrement_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(AccountError::from_http_status(400, "rejected"));
            }
            let mut device = self.device.lock().unwrap();
            let status = device
                .as_mut()
                .ok_or_else(|| AccountError::NotFound("device".into()))?;
            status.free_credits = status.free_credits.saturating_sub(1);
            Ok(status.clone())
        }

        async fn validate_license(&self, license_key: &str) -> AccountResult<bool> {
            Ok(license_key == "GOOD-KEY")
        }
    }

    async fn service_with(backend: FakeBackend) -> (AccountService, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let store = Arc::new(MemoryCredentialStore::new());
        store.put(DEVICE_ID_KEY, b"dev-1").await;

        let retry = RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let service = AccountService::new(
            Arc::clone(&backend) as Arc<dyn BackendClient>,
            Arc::new(AccountCache::new()),
            store,
            retry,
        );
        (service, backend)
    }

    #[tokio::test]
    async fn test_snapshot_uses_cache() {
        let (service, backend) = service_with(FakeBackend::with_device(5, false)).await;
        let cancel = CancellationToken::new();

        let first = service.snapshot(false, &cancel).await.unwrap();
        let second = service.snapshot(false, &cancel).await.unwrap();
        assert_eq!(first.free_credits, 5);
        assert_eq!(second.free_credits, 5);
        assert_eq!(backend.get_calls.load(Ordering::SeqCst), 1);

        service.snapshot(true, &cancel).await.unwrap();
        assert_eq!(backend.get_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_snapshot_registers_unknown_device() {
        let (service, backend) = service_with(FakeBackend::default()).await;

        let snapshot = service.snapshot(false, &CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.device_id, "dev-1");
        assert_eq!(snapshot.free_credits, 3);
        assert!(backend.device.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ensure_can_start() {
        let (service, _) = service_with(FakeBackend::with_device(0, false)).await;
        let err = service
            .ensure_can_start(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::NoCreditsRemaining));

        let (service, _) = service_with(FakeBackend::with_device(0, true)).await;
        assert!(service.ensure_can_start(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_record_credit_use_reconciles() {
        let (service, backend) = service_with(FakeBackend::with_device(2, false)).await;
        let cancel = CancellationToken::new();

        let remaining = service.record_credit_use(&cancel).await.unwrap();
        assert_eq!(remaining, Some(1));
        assert_eq!(backend.decrement_calls.load(Ordering::SeqCst), 1);

        let (cached, _) = service.cache().get(Some(std::time::Duration::from_secs(60))).await.unwrap();
        assert_eq!(cached.free_credits, 1);
        assert!(service.cache().has_recent_credit_update().await);
    }

    #[tokio::test]
    async fn test_record_credit_use_licensed_is_free() {
        let (service, backend) = service_with(FakeBackend::with_device(0, true)).await;

        let remaining = service.record_credit_use(&CancellationToken::new()).await.unwrap();
        assert_eq!(remaining, None);
        assert_eq!(backend.decrement_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_record_credit_use_failure_invalidates() {
        let backend = FakeBackend::with_device(2, false);
        backend.decrement_failures.store(1, Ordering::SeqCst);
        let (service, _) = service_with(backend).await;

        let err = service
            .record_credit_use(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::NetworkPermanent { status: 400, .. }));
        assert!(service.cache().has_recent_invalidation().await);
        assert!(service.cache().get(None).await.is_none());
    }

    #[tokio::test]
    async fn test_activate_license() {
        let (service, backend) = service_with(FakeBackend::with_device(0, false)).await;
        let cancel = CancellationToken::new();
        service.snapshot(false, &cancel).await.unwrap();

        let snapshot = service.activate_license(" GOOD-KEY ", &cancel).await.unwrap();
        assert!(snapshot.license_active);
        assert!(service.cache().has_recent_invalidation().await);
        assert_eq!(
            credentials::get_string(service.credentials.as_ref(), LICENSE_KEY_KEY).await,
            Some("GOOD-KEY".to_string())
        );

        // Next snapshot refetches and sees the license
        let refreshed = service.snapshot(false, &cancel).await.unwrap();
        assert!(refreshed.license_active);
        assert!(backend.get_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_activate_license_rejects_invalid() {
        let (service, _) = service_with(FakeBackend::with_device(0, false)).await;
        let cancel = CancellationToken::new();

        let err = service.activate_license("BAD", &cancel).await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidLicense));
        let err = service.activate_license("  ", &cancel).await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidLicense));
        assert!(credentials::get_string(service.credentials.as_ref(), LICENSE_KEY_KEY)
            .await
            .is_none());
    }
}
