//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use clipdl_media::SafetyConfig;
use clipdl_storage::{ContentCacheConfig, DEFAULT_MAX_AGE, DEFAULT_MAX_BYTES};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// yt-dlp executable; looked up on `PATH` when unset
    pub ytdlp_path: Option<PathBuf>,
    /// FFmpeg executable; looked up on `PATH` when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Scratch directory for downloads that are not cached
    pub work_dir: PathBuf,
    /// Where finished clips are written
    pub output_dir: PathBuf,
    /// Content cache root
    pub cache_dir: PathBuf,
    /// Content cache byte budget
    pub cache_max_bytes: u64,
    /// Content cache entry lifetime
    pub cache_max_age: Duration,
    /// Downloader deadline
    pub download_timeout: Duration,
    /// Transcoder deadline
    pub transcode_timeout: Duration,
    /// Metadata-only downloader deadline
    pub metadata_timeout: Duration,
    /// Pre-download delay range
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// `--sleep-interval` / `--max-sleep-interval` for the downloader
    pub sleep_interval_secs: u64,
    pub max_sleep_interval_secs: u64,
    /// Safety counter file; in-memory only when unset
    pub safety_state_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("clipdl");
        let safety = SafetyConfig::default();
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            work_dir: base.join("work"),
            output_dir: PathBuf::from("clips"),
            cache_dir: base.join("cache"),
            cache_max_bytes: DEFAULT_MAX_BYTES,
            cache_max_age: DEFAULT_MAX_AGE,
            download_timeout: Duration::from_secs(1800), // 30 minutes
            transcode_timeout: Duration::from_secs(1800),
            metadata_timeout: Duration::from_secs(60),
            min_delay: safety.min_delay,
            max_delay: safety.max_delay,
            sleep_interval_secs: safety.sleep_interval_secs,
            max_sleep_interval_secs: safety.max_sleep_interval_secs,
            safety_state_path: None,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            ytdlp_path: env_path("CLIPDL_YTDLP_PATH"),
            ffmpeg_path: env_path("CLIPDL_FFMPEG_PATH"),
            work_dir: env_path("CLIPDL_WORK_DIR").unwrap_or(defaults.work_dir),
            output_dir: env_path("CLIPDL_OUTPUT_DIR").unwrap_or(defaults.output_dir),
            cache_dir: env_path("CLIPDL_CACHE_DIR").unwrap_or(defaults.cache_dir),
            cache_max_bytes: env_parse("CLIPDL_CACHE_MAX_BYTES").unwrap_or(defaults.cache_max_bytes),
            cache_max_age: env_parse("CLIPDL_CACHE_MAX_AGE_HOURS")
                .map(|h: u64| Duration::from_secs(h.saturating_mul(3600)))
                .unwrap_or(defaults.cache_max_age),
            download_timeout: env_parse("CLIPDL_DOWNLOAD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            transcode_timeout: env_parse("CLIPDL_TRANSCODE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.transcode_timeout),
            metadata_timeout: env_parse("CLIPDL_METADATA_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.metadata_timeout),
            min_delay: env_parse("CLIPDL_SAFETY_MIN_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_delay),
            max_delay: env_parse("CLIPDL_SAFETY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            sleep_interval_secs: env_parse("CLIPDL_SLEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sleep_interval_secs),
            max_sleep_interval_secs: env_parse("CLIPDL_MAX_SLEEP_INTERVAL_SECS")
                .unwrap_or(defaults.max_sleep_interval_secs),
            safety_state_path: env_path("CLIPDL_SAFETY_STATE_PATH"),
        }
    }

    pub fn cache_config(&self) -> ContentCacheConfig {
        ContentCacheConfig::new(&self.cache_dir)
            .with_max_bytes(self.cache_max_bytes)
            .with_max_age(self.cache_max_age)
    }

    pub fn safety_config(&self) -> SafetyConfig {
        SafetyConfig {
            min_delay: self.min_delay,
            max_delay: self.max_delay.max(self.min_delay),
            sleep_interval_secs: self.sleep_interval_secs,
            max_sleep_interval_secs: self.max_sleep_interval_secs,
            state_path: self.safety_state_path.clone(),
            ..SafetyConfig::default()
        }
    }
}

/// A set-but-empty path variable is kept so tool resolution can reject it.
fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "CLIPDL_YTDLP_PATH",
        "CLIPDL_CACHE_DIR",
        "CLIPDL_CACHE_MAX_BYTES",
        "CLIPDL_CACHE_MAX_AGE_HOURS",
        "CLIPDL_DOWNLOAD_TIMEOUT_SECS",
        "CLIPDL_SAFETY_MIN_DELAY_MS",
        "CLIPDL_SAFETY_MAX_DELAY_MS",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let config = PipelineConfig::from_env();
        assert!(config.ytdlp_path.is_none());
        assert_eq!(config.cache_max_bytes, DEFAULT_MAX_BYTES);
        assert_eq!(config.cache_max_age, Duration::from_secs(24 * 3600));
        assert_eq!(config.min_delay, Duration::from_secs(3));
        assert_eq!(config.max_delay, Duration::from_secs(8));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear();
        std::env::set_var("CLIPDL_YTDLP_PATH", "/opt/yt-dlp");
        std::env::set_var("CLIPDL_CACHE_MAX_BYTES", "1024");
        std::env::set_var("CLIPDL_CACHE_MAX_AGE_HOURS", "2");
        std::env::set_var("CLIPDL_DOWNLOAD_TIMEOUT_SECS", "not-a-number");
        std::env::set_var("CLIPDL_SAFETY_MIN_DELAY_MS", "0");
        std::env::set_var("CLIPDL_SAFETY_MAX_DELAY_MS", "0");

        let config = PipelineConfig::from_env();
        assert_eq!(config.ytdlp_path, Some(PathBuf::from("/opt/yt-dlp")));
        assert_eq!(config.cache_max_bytes, 1024);
        assert_eq!(config.cache_max_age, Duration::from_secs(7200));
        assert_eq!(config.download_timeout, Duration::from_secs(1800));
        assert_eq!(config.safety_config().max_delay, Duration::ZERO);

        clear();
    }

    #[test]
    #[serial]
    fn test_huge_cache_age_saturates() {
        clear();
        std::env::set_var("CLIPDL_CACHE_MAX_AGE_HOURS", u64::MAX.to_string());
        assert_eq!(PipelineConfig::from_env().cache_max_age, Duration::from_secs(u64::MAX));
        clear();
    }

    #[test]
    #[serial]
    fn test_empty_tool_path_is_kept() {
        clear();
        std::env::set_var("CLIPDL_YTDLP_PATH", "");
        assert_eq!(PipelineConfig::from_env().ytdlp_path, Some(PathBuf::new()));
        clear();
    }
}
