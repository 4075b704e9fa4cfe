//! Persistent content cache for clipdl.
//!
//! Downloaded videos are kept on disk for a bounded time and within a byte
//! budget so repeated clips from the same source skip the download.

pub mod content_cache;
pub mod error;
pub mod fs_utils;
pub mod metrics;

pub use content_cache::{
    CacheKey, CachedVideoEntry, ContentCache, ContentCacheConfig, DEFAULT_MAX_AGE,
    DEFAULT_MAX_BYTES,
};
pub use error::{StorageError, StorageResult};
pub use fs_utils::{link_or_copy, move_file};
