//! Clip creation: trim and crop a downloaded video with FFmpeg.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clipdl_models::{format_seconds, validate_clip_range, AspectMode, ClipRange};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::process::ProcessSupervisor;
use crate::progress::TranscodeProgress;

/// x264 preset used for every clip.
pub const VIDEO_PRESET: &str = "veryfast";
pub const VIDEO_CRF: u8 = 20;
pub const AUDIO_BITRATE: &str = "160k";

/// One trim/crop request.
#[derive(Debug, Clone)]
pub struct ClipRequest<'a> {
    pub input: &'a Path,
    pub output_dir: &'a Path,
    /// Start timestamp (`HH:MM:SS`)
    pub start: &'a str,
    /// End timestamp (`HH:MM:SS`)
    pub end: &'a str,
    pub aspect: AspectMode,
}

/// Output file name for a clip, e.g. `clip_00-10-30_to_00-20-45_vertical.mp4`.
pub fn clip_output_filename(range: &ClipRange, aspect: AspectMode) -> String {
    match aspect {
        AspectMode::Original => format!("clip_{}.mp4", range.file_stem()),
        other => format!("clip_{}_{}.mp4", range.file_stem(), other.as_str()),
    }
}

/// Build the FFmpeg command for a validated range.
pub fn build_clip_command(
    input: &Path,
    output: &Path,
    range: &ClipRange,
    aspect: AspectMode,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(input, output)
        .seek(range.start.clone())
        .duration(range.duration_secs());

    if let Some(crop) = aspect.crop_filter() {
        cmd = cmd.video_filter(crop);
    }

    cmd.video_codec("libx264")
        .preset(VIDEO_PRESET)
        .crf(VIDEO_CRF)
        .audio_codec("aac")
        .audio_bitrate(AUDIO_BITRATE)
}

/// Trim (and optionally crop) `req.input` into `req.output_dir`.
///
/// `on_progress` receives transcode progress as a 0-1 fraction. Returns the
/// path of the produced clip.
pub async fn create_clip<F>(
    supervisor: &ProcessSupervisor,
    program: &Path,
    req: &ClipRequest<'_>,
    timeout: Duration,
    cancel: &CancellationToken,
    on_progress: F,
) -> MediaResult<PathBuf>
where
    F: Fn(f64) + Send + Sync + 'static,
{
    if !tokio::fs::try_exists(req.input).await.unwrap_or(false) {
        return Err(MediaError::FileNotFound(req.input.to_path_buf()));
    }

    let range = validate_clip_range(req.start, req.end)?;

    tokio::fs::create_dir_all(req.output_dir).await?;
    let output = req.output_dir.join(clip_output_filename(&range, req.aspect));

    info!(
        input = %req.input.display(),
        output = %output.display(),
        start = %range.start,
        end = %range.end,
        length = %format_seconds(range.duration_secs()),
        aspect = %req.aspect,
        "Creating clip"
    );

    let progress = std::sync::Mutex::new(TranscodeProgress::with_total(range.duration_secs() as f64));
    let invocation = build_clip_command(req.input, &output, &range, req.aspect)
        .into_invocation(program, timeout)
        .on_error(move |line| {
            let mut state = progress.lock().unwrap_or_else(|e| e.into_inner());
            let (next, fraction) = state.observe(line);
            *state = next;
            drop(state);
            if let Some(f) = fraction {
                on_progress(f);
            }
        });

    let outcome = supervisor.run(&invocation, cancel).await?;

    if !outcome.success() {
        let stderr = outcome.stderr_text();
        let tail = last_lines(&stderr, 5);
        warn!(exit_code = ?outcome.exit_code, stderr = %tail, "FFmpeg failed");
        cleanup_partial(&output).await;
        return Err(MediaError::tool_failed(
            format!("Transcoder failed: {}", tail),
            outcome.exit_code,
        ));
    }

    if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
        return Err(MediaError::tool_failed(
            "Transcoder reported success but produced no file",
            outcome.exit_code,
        ));
    }

    info!(output = %output.display(), duration_ms = outcome.duration.as_millis() as u64, "Clip created");
    Ok(output)
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

async fn cleanup_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial clip"),
    }
}
