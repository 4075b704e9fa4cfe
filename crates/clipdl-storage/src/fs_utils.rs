//! Filesystem helpers for moving payloads into the cache directory.
//!
//! The download work directory may live on a different filesystem than the
//! cache, so a plain rename can fail with EXDEV.

use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::StorageResult;

/// Move `src` to `dst`, falling back to copy+delete across filesystems.
///
/// The destination's parent directory is created if needed. An existing
/// destination is replaced.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> StorageResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(src = %src.display(), dst = %dst.display(), "Cross-device move, copying");
            copy_then_remove(src, dst).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Give `dst` its own reference to `src`'s bytes.
///
/// Hard-links when possible, otherwise copies. The source is left in place,
/// and removing it afterwards does not affect `dst`.
pub async fn link_or_copy(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> StorageResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }
    remove_quietly(dst).await;

    if let Err(e) = fs::hard_link(src, dst).await {
        debug!(src = %src.display(), dst = %dst.display(), error = %e, "Hard link failed, copying");
        fs::copy(src, dst).await?;
    }
    Ok(())
}

/// Remove a file, treating "already gone" as success.
///
/// Failures are logged and swallowed; callers use this for cleanup only.
pub async fn remove_quietly(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

/// EXDEV is errno 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_then_remove(src: &Path, dst: &Path) -> StorageResult<()> {
    // Stage next to dst so the final rename stays on one filesystem
    let staged = dst.with_extension("partial");

    if let Err(e) = fs::copy(src, &staged).await {
        remove_quietly(&staged).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&staged, dst).await {
        remove_quietly(&staged).await;
        return Err(e.into());
    }

    remove_quietly(src).await;
    Ok(())
}
