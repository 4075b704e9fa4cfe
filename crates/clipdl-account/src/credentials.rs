//! Device credential storage.
//!
//! The device identifier and license key live in a platform secure store.
//! Only the contract is defined here; platforms plug in their own store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{AccountError, AccountResult};

/// Store key for the device identifier.
pub const DEVICE_ID_KEY: &str = "device_id";

/// Store key for the license key.
pub const LICENSE_KEY_KEY: &str = "license_key";

/// Key/value secure storage.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store a value. Returns `false` if the store refused it.
    async fn put(&self, key: &str, value: &[u8]) -> bool;

    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Remove a value. Returns `false` if nothing was removed.
    async fn delete(&self, key: &str) -> bool;
}

/// In-process store. Forgets everything on drop.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn put(&self, key: &str, value: &[u8]) -> bool {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        true
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().await.get(key).cloned()
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }
}

/// Read a UTF-8 value, treating undecodable bytes as absent.
pub async fn get_string(store: &dyn CredentialStore, key: &str) -> Option<String> {
    store
        .get(key)
        .await
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|s| !s.is_empty())
}

/// Stable device identifier, generated and persisted on first use.
pub async fn device_id(store: &dyn CredentialStore) -> AccountResult<String> {
    if let Some(id) = get_string(store, DEVICE_ID_KEY).await {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    if !store.put(DEVICE_ID_KEY, id.as_bytes()).await {
        return Err(AccountError::credential_store("failed to persist device id"));
    }

    info!(device_id = %id, "Generated new device id");
    Ok(id)
}

/// Persist a license key.
pub async fn store_license_key(store: &dyn CredentialStore, key: &str) -> AccountResult<()> {
    if store.put(LICENSE_KEY_KEY, key.as_bytes()).await {
        Ok(())
    } else {
        Err(AccountError::credential_store("failed to persist license key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReadOnlyStore;

    #[async_trait]
    impl CredentialStore for ReadOnlyStore {
        async fn put(&self, _key: &str, _value: &[u8]) -> bool {
            false
        }

        async fn get(&self, _key: &str) -> Option<Vec<u8>> {
            None
        }

        async fn delete(&self, _key: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert!(store.get("a").await.is_none());
        assert!(store.put("a", b"value").await);
        assert_eq!(store.get("a").await.unwrap(), b"value");
        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
    }

    #[tokio::test]
    async fn test_device_id_is_stable() {
        let store = MemoryCredentialStore::new();
        let first = device_id(&store).await.unwrap();
        let second = device_id(&store).await.unwrap();

        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[tokio::test]
    async fn test_device_id_reuses_existing() {
        let store = MemoryCredentialStore::new();
        store.put(DEVICE_ID_KEY, b"known-device").await;
        assert_eq!(device_id(&store).await.unwrap(), "known-device");
    }

    #[tokio::test]
    async fn test_failed_put_is_error() {
        let err = device_id(&ReadOnlyStore).await.unwrap_err();
        assert!(matches!(err, AccountError::CredentialStore(_)));

        let err = store_license_key(&ReadOnlyStore, "KEY").await.unwrap_err();
        assert!(matches!(err, AccountError::CredentialStore(_)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_treated_as_absent() {
        let store = MemoryCredentialStore::new();
        store.put(LICENSE_KEY_KEY, &[0xff, 0xfe]).await;
        assert!(get_string(&store, LICENSE_KEY_KEY).await.is_none());
    }
}
