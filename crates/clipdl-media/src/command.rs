//! FFmpeg command builder and external tool discovery.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::process::{ProcessInvocation, StreamMode};

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Seek the input to a clock position (`HH:MM:SS`) before decoding.
    pub fn seek(self, position: impl Into<String>) -> Self {
        self.input_arg("-ss").input_arg(position)
    }

    /// Limit output duration in whole seconds.
    pub fn duration(self, seconds: u64) -> Self {
        self.output_arg("-t").output_arg(seconds.to_string())
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        // Never read the terminal; progress stays on stderr
        args.push("-nostdin".to_string());
        args.push("-hide_banner".to_string());

        args.extend(self.input_args.iter().cloned());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Turn the command into a supervised invocation of `ffmpeg`.
    pub fn into_invocation(self, program: impl AsRef<Path>, timeout: Duration) -> ProcessInvocation {
        ProcessInvocation::new(program, timeout)
            .args(self.build_args())
            .stream_mode(StreamMode::Separate)
    }
}

/// Resolve an external tool.
///
/// A configured path wins, but must not be empty. Without one, the tool is
/// looked up on `PATH`.
pub fn resolve_tool(configured: Option<&Path>, name: &str) -> MediaResult<PathBuf> {
    match configured {
        Some(path) if path.as_os_str().is_empty() => Err(MediaError::launch_failure(
            name,
            "configured tool path is empty",
        )),
        Some(path) => Ok(path.to_path_buf()),
        None => {
            let found = which::which(name).map_err(|e| {
                MediaError::launch_failure(name, format!("not found on PATH: {}", e))
            })?;
            debug!(tool = name, path = %found.display(), "Resolved tool from PATH");
            Ok(found)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_order() {
        let args = FfmpegCommand::new("/in.mp4", "/out.mp4")
            .seek("00:10:30")
            .duration(615)
            .video_filter("crop=ih:ih")
            .video_codec("libx264")
            .build_args();

        assert_eq!(
            args,
            vec![
                "-y", "-nostdin", "-hide_banner", "-ss", "00:10:30", "-i", "/in.mp4", "-t", "615",
                "-vf", "crop=ih:ih", "-c:v", "libx264", "/out.mp4",
            ]
        );
    }

    #[test]
    fn test_into_invocation() {
        let inv = FfmpegCommand::new("/in.mp4", "/out.mp4")
            .into_invocation("/usr/bin/ffmpeg", Duration::from_secs(60));
        assert_eq!(inv.program(), Path::new("/usr/bin/ffmpeg"));
        assert_eq!(inv.get_args().last().map(String::as_str), Some("/out.mp4"));
        assert_eq!(inv.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_tool_configured() {
        let path = resolve_tool(Some(Path::new("/opt/yt-dlp")), "yt-dlp").unwrap();
        assert_eq!(path, PathBuf::from("/opt/yt-dlp"));
    }

    #[test]
    fn test_resolve_tool_empty_path() {
        let result = resolve_tool(Some(Path::new("")), "ffmpeg");
        assert!(matches!(result, Err(MediaError::LaunchFailure { .. })));
    }

    #[test]
    fn test_resolve_tool_missing_on_path() {
        let result = resolve_tool(None, "clipdl-definitely-not-installed");
        assert!(matches!(result, Err(MediaError::LaunchFailure { .. })));
    }
}
