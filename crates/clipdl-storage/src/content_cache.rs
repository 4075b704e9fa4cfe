//! Persistent content cache for downloaded videos.
//!
//! Layout under the cache root:
//! - `{key}.mp4` payload
//! - `{key}.json` sidecar describing the payload
//! - `metadata/{content_id}.json` metadata-only records
//!
//! Entries expire after a fixed age and the payloads share a byte budget;
//! saving evicts least-recently-accessed entries until the new one fits. The
//! in-memory index is rebuilt from sidecars when the cache is opened.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clipdl_models::{Quality, VideoMetadata};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StorageResult;
use crate::fs_utils::{link_or_copy, move_file, remove_quietly};
use crate::metrics;

/// Entries older than this are misses.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Total payload budget.
pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024 * 1024;

const PAYLOAD_EXT: &str = "mp4";
const SIDECAR_EXT: &str = "json";
const METADATA_DIR: &str = "metadata";

/// Cache key: content id (or URL hash) plus quality label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a video.
    ///
    /// Uses the content id when known, otherwise the SHA-256 hex digest of
    /// the trimmed URL. Content ids with characters unsafe for file names are
    /// treated as unknown.
    pub fn derive(content_id: Option<&str>, url: &str, quality: Quality) -> Self {
        let base = match content_id.filter(|id| is_safe_component(id)) {
            Some(id) => id.to_string(),
            None => url_digest(url),
        };
        Self(format!("{}_{}", base, quality.label()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn url_digest(url: &str) -> String {
    let digest = Sha256::digest(url.trim().as_bytes());
    format!("{:x}", digest)
}

fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 128
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// One cached payload, persisted as its sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedVideoEntry {
    pub key: CacheKey,
    pub cached_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub payload_path: PathBuf,
    pub size_bytes: u64,
    pub quality: Quality,
    pub metadata: VideoMetadata,
}

/// Metadata-only record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataRecord {
    cached_at: DateTime<Utc>,
    metadata: VideoMetadata,
}

/// Content cache configuration.
#[derive(Debug, Clone)]
pub struct ContentCacheConfig {
    pub root: PathBuf,
    pub max_bytes: u64,
    pub max_age: Duration,
}

impl ContentCacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_bytes: DEFAULT_MAX_BYTES,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<CacheKey, CachedVideoEntry>,
    total_bytes: u64,
}

impl Index {
    fn insert(&mut self, entry: CachedVideoEntry) {
        self.total_bytes += entry.size_bytes;
        if let Some(old) = self.entries.insert(entry.key.clone(), entry) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CachedVideoEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Least-recently-accessed key.
    fn lru_key(&self) -> Option<CacheKey> {
        self.entries
            .values()
            .min_by_key(|e| e.last_accessed)
            .map(|e| e.key.clone())
    }
}

/// Size-bounded, expiring on-disk cache of downloaded videos.
#[derive(Debug)]
pub struct ContentCache {
    config: ContentCacheConfig,
    index: Mutex<Index>,
}

impl ContentCache {
    /// Open (or create) the cache and rebuild its index from sidecars.
    ///
    /// Corrupt sidecars and sidecars whose payload is missing are removed.
    pub async fn open(config: ContentCacheConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.root).await?;
        fs::create_dir_all(config.root.join(METADATA_DIR)).await?;

        let mut index = Index::default();
        let mut dir = fs::read_dir(&config.root).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SIDECAR_EXT) {
                continue;
            }

            let entry = match read_sidecar(&path).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping corrupt cache sidecar");
                    remove_quietly(&path).await;
                    continue;
                }
            };

            let payload = payload_path(&config.root, &entry.key);
            match fs::metadata(&payload).await {
                Ok(meta) => index.insert(CachedVideoEntry {
                    payload_path: payload,
                    size_bytes: meta.len(),
                    ..entry
                }),
                Err(_) => {
                    debug!(key = %entry.key, "Dropping sidecar without payload");
                    remove_quietly(&path).await;
                }
            }
        }

        info!(
            root = %config.root.display(),
            entries = index.entries.len(),
            total_bytes = index.total_bytes,
            "Content cache opened"
        );

        let cache = Self {
            config,
            index: Mutex::new(index),
        };

        // Budget may have shrunk since the last run
        {
            let mut index = cache.index.lock().await;
            cache.evict_until_fits(&mut index, 0).await;
            metrics::record_size(index.total_bytes);
        }

        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.config.max_bytes
    }

    /// Move `payload` into the cache under the key derived from `metadata`.
    ///
    /// Returns `false` (leaving `payload` where it was) when the payload is
    /// unreadable, larger than the whole budget, or cannot be stored.
    /// Least-recently-accessed entries are evicted to make room.
    pub async fn save(&self, payload: &Path, metadata: &VideoMetadata, quality: Quality) -> bool {
        let key = CacheKey::derive(metadata.content_id.as_deref(), &metadata.source_url, quality);

        let size = match fs::metadata(payload).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %payload.display(), error = %e, "Cannot stat payload, not caching");
                return false;
            }
        };

        if size > self.config.max_bytes {
            warn!(
                key = %key,
                size_bytes = size,
                max_bytes = self.config.max_bytes,
                "Payload exceeds cache budget, not caching"
            );
            return false;
        }

        let mut index = self.index.lock().await;

        if let Some(old) = index.remove(&key) {
            if old.payload_path != payload {
                remove_quietly(&old.payload_path).await;
            }
        }
        self.evict_until_fits(&mut index, size).await;

        let dest = payload_path(&self.config.root, &key);
        if dest != payload {
            if let Err(e) = move_file(payload, &dest).await {
                warn!(key = %key, error = %e, "Failed to move payload into cache");
                return false;
            }
        }

        let now = Utc::now();
        let entry = CachedVideoEntry {
            key: key.clone(),
            cached_at: now,
            last_accessed: now,
            payload_path: dest.clone(),
            size_bytes: size,
            quality,
            metadata: metadata.clone(),
        };

        if let Err(e) = write_json(&sidecar_path(&self.config.root, &key), &entry).await {
            warn!(key = %key, error = %e, "Failed to write cache sidecar");
            // Hand the payload back so the caller can still use it
            if dest != payload {
                if let Err(e) = move_file(&dest, payload).await {
                    warn!(key = %key, error = %e, "Failed to restore payload");
                }
            }
            return false;
        }

        index.insert(entry);
        metrics::record_size(index.total_bytes);
        let total_bytes = index.total_bytes;
        drop(index);

        self.save_metadata(metadata).await;

        info!(key = %key, size_bytes = size, total_bytes, "Cached video");
        true
    }

    /// Fresh entry for `key`, refreshing its last-access time.
    ///
    /// Expired entries and entries whose payload vanished are removed and
    /// reported as misses.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedVideoEntry> {
        let mut index = self.index.lock().await;
        self.lookup_locked(&mut index, key).await
    }

    /// Like [`lookup`](Self::lookup), but also links the payload to `dest`.
    ///
    /// The link is made while the index is locked, so a concurrent `save`
    /// cannot evict the payload first. The returned entry's `payload_path`
    /// is `dest`, which stays readable even if the entry is evicted later.
    pub async fn checkout(&self, key: &CacheKey, dest: &Path) -> Option<CachedVideoEntry> {
        let mut index = self.index.lock().await;
        let mut entry = self.lookup_locked(&mut index, key).await?;

        if let Err(e) = link_or_copy(&entry.payload_path, dest).await {
            warn!(key = %key, dest = %dest.display(), error = %e, "Failed to check out cached payload");
            return None;
        }

        entry.payload_path = dest.to_path_buf();
        Some(entry)
    }

    async fn lookup_locked(&self, index: &mut Index, key: &CacheKey) -> Option<CachedVideoEntry> {
        let now = Utc::now();

        let Some(entry) = index.entries.get(key) else {
            metrics::record_miss();
            return None;
        };

        if self.is_expired(entry.cached_at, now) {
            debug!(key = %key, "Cache entry expired");
            self.remove_entry(index, key, "expired").await;
            metrics::record_miss();
            return None;
        }

        if !fs::try_exists(&entry.payload_path).await.unwrap_or(false) {
            warn!(key = %key, "Cached payload missing, dropping entry");
            self.remove_entry(index, key, "missing").await;
            metrics::record_miss();
            return None;
        }

        let entry = index.entries.get_mut(key)?;
        entry.last_accessed = now;
        let snapshot = entry.clone();

        if let Err(e) = write_json(&sidecar_path(&self.config.root, key), &snapshot).await {
            warn!(key = %key, error = %e, "Failed to refresh sidecar access time");
        }

        metrics::record_hit();
        Some(snapshot)
    }

    /// Fresh metadata for a content id, with or without a payload.
    pub async fn lookup_metadata_only(&self, content_id: &str) -> Option<VideoMetadata> {
        if !is_safe_component(content_id) {
            return None;
        }

        let path = metadata_path(&self.config.root, content_id);
        let bytes = fs::read(&path).await.ok()?;
        let record: MetadataRecord = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt metadata record");
                remove_quietly(&path).await;
                return None;
            }
        };

        if self.is_expired(record.cached_at, Utc::now()) {
            remove_quietly(&path).await;
            return None;
        }

        Some(record.metadata)
    }

    /// Store a metadata-only record. Requires a content id.
    pub async fn save_metadata(&self, metadata: &VideoMetadata) -> bool {
        let Some(content_id) = metadata.content_id.as_deref().filter(|id| is_safe_component(id))
        else {
            return false;
        };

        let record = MetadataRecord {
            cached_at: Utc::now(),
            metadata: metadata.clone(),
        };

        match write_json(&metadata_path(&self.config.root, content_id), &record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(content_id, error = %e, "Failed to write metadata record");
                false
            }
        }
    }

    /// Remove every expired payload entry and metadata record.
    ///
    /// Returns the number of items removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;

        {
            let mut index = self.index.lock().await;
            let expired: Vec<CacheKey> = index
                .entries
                .values()
                .filter(|e| self.is_expired(e.cached_at, now))
                .map(|e| e.key.clone())
                .collect();

            for key in expired {
                self.remove_entry(&mut index, &key, "expired").await;
                removed += 1;
            }
            metrics::record_size(index.total_bytes);
        }

        removed += self.purge_expired_metadata(now).await;

        if removed > 0 {
            info!(removed, "Purged expired cache entries");
        }
        removed
    }

    /// Bytes held by cached payloads. Never exceeds the budget.
    pub async fn total_size(&self) -> u64 {
        self.index.lock().await.total_bytes
    }

    /// Number of cached payloads.
    pub async fn len(&self) -> usize {
        self.index.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn is_expired(&self, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(cached_at)
            .to_std()
            .map(|age| age > self.config.max_age)
            .unwrap_or(false)
    }

    async fn evict_until_fits(&self, index: &mut Index, incoming: u64) {
        while index.total_bytes + incoming > self.config.max_bytes {
            let Some(key) = index.lru_key() else {
                break;
            };
            debug!(key = %key, "Evicting least recently used entry");
            self.remove_entry(index, &key, "lru").await;
        }
    }

    async fn remove_entry(&self, index: &mut Index, key: &CacheKey, reason: &'static str) {
        if let Some(entry) = index.remove(key) {
            remove_quietly(&entry.payload_path).await;
            remove_quietly(sidecar_path(&self.config.root, key)).await;
            metrics::record_eviction(reason);
        }
    }

    async fn purge_expired_metadata(&self, now: DateTime<Utc>) -> usize {
        let dir_path = self.config.root.join(METADATA_DIR);
        let Ok(mut dir) = fs::read_dir(&dir_path).await else {
            return 0;
        };

        let mut removed = 0;
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            let expired = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<MetadataRecord>(&bytes)
                    .map(|r| self.is_expired(r.cached_at, now))
                    .unwrap_or(true),
                Err(_) => false,
            };
            if expired {
                remove_quietly(&path).await;
                removed += 1;
            }
        }
        removed
    }
}

fn payload_path(root: &Path, key: &CacheKey) -> PathBuf {
    root.join(format!("{}.{}", key, PAYLOAD_EXT))
}

fn sidecar_path(root: &Path, key: &CacheKey) -> PathBuf {
    root.join(format!("{}.{}", key, SIDECAR_EXT))
}

fn metadata_path(root: &Path, content_id: &str) -> PathBuf {
    root.join(METADATA_DIR).join(format!("{}.{}", content_id, SIDECAR_EXT))
}

async fn read_sidecar(path: &Path) -> StorageResult<CachedVideoEntry> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write JSON via a temp file and rename, so readers never see a torn file.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        remove_quietly(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
