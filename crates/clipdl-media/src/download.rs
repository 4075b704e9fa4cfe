//! Video download via yt-dlp.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clipdl_models::{Quality, VideoMetadata};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::process::{ProcessInvocation, ProcessSupervisor, StreamMode};
use crate::progress::parse_download_progress;
use crate::safety::SafetyDirectives;

/// yt-dlp format selector for a quality label.
///
/// Unrecognized labels fall back to the 720p chain.
pub fn format_selector(label: &str) -> String {
    format_selector_for(Quality::from_label(label))
}

/// yt-dlp format selector for a parsed quality.
pub fn format_selector_for(quality: Quality) -> String {
    match quality {
        Quality::Best => "bestvideo+bestaudio/best".to_string(),
        Quality::Height(h) => format!(
            "bestvideo[height<={h}]+bestaudio[ext=m4a]/bestvideo[height<={h}]+bestaudio/best[height<={h}]/best"
        ),
    }
}

/// Map downloader error output to a user-facing message.
///
/// Checked in priority order; unrecognized output is returned as-is.
pub fn classify_tool_error(stderr: &str) -> String {
    let lower = stderr.to_ascii_lowercase();

    if lower.contains("http error 429")
        || lower.contains("status code 429")
        || lower.contains("too many requests")
    {
        "YouTube is temporarily blocking requests from this network (HTTP 429). Wait a while before downloading again.".to_string()
    } else if lower.contains("not a bot") {
        "YouTube asked to confirm you're not a bot. Verification is required; try again later.".to_string()
    } else if lower.contains("age-restricted")
        || lower.contains("age restricted")
        || lower.contains("confirm your age")
    {
        "This video is age-restricted and requires sign-in, which is not supported.".to_string()
    } else if lower.contains("private video") {
        "This video is private.".to_string()
    } else if lower.contains("not available in your country")
        || lower.contains("blocked it in your country")
        || lower.contains("geo restrict")
        || lower.contains("geo-restrict")
    {
        "This video is not available in your region.".to_string()
    } else if lower.contains("http error 403") || lower.contains("403: forbidden") {
        "Access to this video was denied (HTTP 403).".to_string()
    } else {
        stderr.to_string()
    }
}

/// One download.
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    pub url: &'a str,
    pub quality: Quality,
    /// Directory receiving the payload and its info JSON
    pub work_dir: &'a Path,
    /// File stem for the payload (cache key)
    pub key: &'a str,
    pub directives: &'a SafetyDirectives,
}

/// Files produced by a successful download.
#[derive(Debug, Clone)]
pub struct DownloadedVideo {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Parsed info JSON, when the downloader wrote one
    pub metadata: Option<VideoMetadata>,
}

/// Build the yt-dlp argument vector for a request.
pub fn build_download_args(req: &DownloadRequest<'_>) -> Vec<String> {
    let template = req.work_dir.join(format!("{}.%(ext)s", req.key));

    vec![
        "--newline".to_string(),
        "--no-playlist".to_string(),
        "--no-part".to_string(),
        "-f".to_string(),
        format_selector_for(req.quality),
        "--merge-output-format".to_string(),
        "mp4".to_string(),
        "--user-agent".to_string(),
        req.directives.user_agent.clone(),
        "--referer".to_string(),
        req.directives.referer.clone(),
        "--sleep-interval".to_string(),
        req.directives.sleep_interval_secs.to_string(),
        "--max-sleep-interval".to_string(),
        req.directives.max_sleep_interval_secs.to_string(),
        "--write-info-json".to_string(),
        "-o".to_string(),
        template.to_string_lossy().to_string(),
        req.url.to_string(),
    ]
}

/// Download a video with yt-dlp.
///
/// `on_progress` receives download progress as a 0-1 fraction.
pub async fn download_video<F>(
    supervisor: &ProcessSupervisor,
    program: &Path,
    req: &DownloadRequest<'_>,
    timeout: Duration,
    cancel: &CancellationToken,
    on_progress: F,
) -> MediaResult<DownloadedVideo>
where
    F: Fn(f64) + Send + Sync + 'static,
{
    tokio::fs::create_dir_all(req.work_dir).await?;

    info!(
        url = req.url,
        quality = %req.quality.label(),
        output_dir = %req.work_dir.display(),
        "Downloading video with yt-dlp"
    );

    let invocation = ProcessInvocation::new(program, timeout)
        .args(build_download_args(req))
        .stream_mode(StreamMode::Separate)
        .on_output(move |line| {
            if let Some(pct) = parse_download_progress(line) {
                on_progress(pct / 100.0);
            }
        });

    let outcome = supervisor.run(&invocation, cancel).await?;

    if !outcome.success() {
        let stderr = outcome.stderr_text();
        let message = classify_tool_error(&stderr);
        warn!(
            url = req.url,
            exit_code = ?outcome.exit_code,
            reason = %message,
            "yt-dlp failed"
        );
        let message = if message.trim().is_empty() {
            format!("Downloader exited with code {:?}", outcome.exit_code)
        } else {
            message
        };
        return Err(MediaError::tool_failed(message, outcome.exit_code));
    }

    let path = locate_payload(req.work_dir, req.key).await?.ok_or_else(|| {
        MediaError::tool_failed("Downloader reported success but produced no file", outcome.exit_code)
    })?;
    let size_bytes = tokio::fs::metadata(&path).await?.len();

    let info_path = req.work_dir.join(format!("{}.info.json", req.key));
    let metadata = read_info_json(&info_path, req.url).await;

    info!(
        output = %path.display(),
        size_mb = size_bytes as f64 / 1_000_000.0,
        "Download complete"
    );

    Ok(DownloadedVideo {
        path,
        size_bytes,
        metadata,
    })
}

/// Fetch metadata without downloading the video.
pub async fn fetch_metadata(
    supervisor: &ProcessSupervisor,
    program: &Path,
    url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> MediaResult<VideoMetadata> {
    debug!(url = url, "Fetching metadata with yt-dlp");

    let invocation = ProcessInvocation::new(program, timeout).args([
        "--dump-json",
        "--skip-download",
        "--no-playlist",
        "--no-warnings",
        url,
    ]);

    let outcome = supervisor.run(&invocation, cancel).await?;
    if !outcome.success() {
        return Err(MediaError::tool_failed(
            classify_tool_error(&outcome.stderr_text()),
            outcome.exit_code,
        ));
    }

    Ok(VideoMetadata::from_info_json(&outcome.stdout_text(), url)?)
}

/// Find the file yt-dlp wrote for `key`, preferring the merged MP4.
async fn locate_payload(work_dir: &Path, key: &str) -> MediaResult<Option<PathBuf>> {
    let merged = work_dir.join(format!("{}.mp4", key));
    if tokio::fs::try_exists(&merged).await? {
        return Ok(Some(merged));
    }

    let prefix = format!("{}.", key);
    let mut entries = tokio::fs::read_dir(work_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && !name.ends_with(".json") && !name.ends_with(".part") {
            return Ok(Some(entry.path()));
        }
    }

    Ok(None)
}

async fn read_info_json(path: &Path, url: &str) -> Option<VideoMetadata> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    match VideoMetadata::from_info_json(&text, url) {
        Ok(meta) => {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), error = %e, "Failed to remove info json");
            }
            Some(meta)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unparseable info json");
            None
        }
    }
}
