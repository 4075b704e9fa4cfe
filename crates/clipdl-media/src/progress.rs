//! Progress parsing for downloader and transcoder output.
//!
//! Both tools report progress as free-form text lines. The download parser is
//! stateless; the transcode parser needs the total duration, which FFmpeg
//! announces once near the start of its stderr, so it is threaded through the
//! caller as a small `Copy` value.

use std::sync::OnceLock;

use regex::Regex;

fn download_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\[download\]\s+(\d{1,3}(?:\.\d+)?)%\s+of")
            .expect("valid regex")
    })
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Duration:\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)")
            .expect("valid regex")
    })
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"time=\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)")
            .expect("valid regex")
    })
}

/// Parse a yt-dlp progress line such as `[download]  45.5% of 10.00MiB at ...`.
///
/// Returns the percentage (0-100), or `None` for any other line.
pub fn parse_download_progress(line: &str) -> Option<f64> {
    let caps = download_regex().captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 100.0))
}

/// Parse an `HH:MM:SS.ss` clock value into seconds.
pub fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;

    if hours < 0.0 || !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Transcode progress state.
///
/// Holds the total duration once known. `observe` returns the next state, so
/// callers keep one value per invocation and never share it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TranscodeProgress {
    total_secs: Option<f64>,
}

impl TranscodeProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a known total (e.g. the clip length when trimming).
    pub fn with_total(total_secs: f64) -> Self {
        Self {
            total_secs: (total_secs > 0.0).then_some(total_secs),
        }
    }

    pub fn total_secs(&self) -> Option<f64> {
        self.total_secs
    }

    /// Feed one stderr line.
    ///
    /// The first `Duration:` announcement sets the total; later ones are
    /// ignored (FFmpeg also prints durations for outputs and streams). A
    /// `time=` line yields `elapsed / total` clamped to 0-1.
    pub fn observe(self, line: &str) -> (TranscodeProgress, Option<f64>) {
        let mut next = self;

        if next.total_secs.is_none() {
            if let Some(total) = duration_regex()
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_clock(m.as_str()))
                .filter(|t| *t > 0.0)
            {
                next.total_secs = Some(total);
            }
        }

        let fraction = match next.total_secs {
            Some(total) => time_regex()
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_clock(m.as_str()))
                .map(|elapsed| (elapsed / total).clamp(0.0, 1.0)),
            None => None,
        };

        (next, fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_progress() {
        assert_eq!(
            parse_download_progress("[download]  45.5% of 10.00MiB at 1.00MiB/s ETA 00:05"),
            Some(45.5)
        );
        assert_eq!(
            parse_download_progress("[download] 100% of 10.00MiB in 00:10"),
            Some(100.0)
        );
        assert_eq!(
            parse_download_progress("[download]   0.0% of ~  3.21MiB"),
            Some(0.0)
        );
    }

    #[test]
    fn test_download_progress_ignores_other_lines() {
        assert_eq!(parse_download_progress("[youtube] dQw4w9WgXcQ: Downloading webpage"), None);
        assert_eq!(parse_download_progress("[download] Destination: /tmp/x.mp4"), None);
        assert_eq!(parse_download_progress(""), None);
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("00:00:10.50"), Some(10.5));
        assert_eq!(parse_clock("01:02:03"), Some(3723.0));
        assert_eq!(parse_clock("00:61:00"), None);
        assert_eq!(parse_clock("garbage"), None);
    }

    #[test]
    fn test_transcode_progress_sequence() {
        let state = TranscodeProgress::new();

        let (state, p) = state.observe("  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s");
        assert_eq!(p, None);
        assert_eq!(state.total_secs(), Some(10.0));

        let (state, p) = state.observe("frame=  100 fps=50 q=28.0 size=512kB time=00:00:05.00 bitrate=838.9kbits/s");
        assert_eq!(p, Some(0.5));

        let (_, p) = state.observe("frame=  300 fps=50 time=00:00:12.00 speed=2x");
        assert_eq!(p, Some(1.0));
    }

    #[test]
    fn test_transcode_progress_without_total() {
        let (state, p) = TranscodeProgress::new().observe("frame=1 time=00:00:05.00");
        assert_eq!(p, None);
        assert_eq!(state.total_secs(), None);
    }

    #[test]
    fn test_first_duration_wins() {
        let (state, _) = TranscodeProgress::new().observe("Duration: 00:01:40.00, start: 0");
        let (state, _) = state.observe("Duration: 00:00:05.00, start: 0");
        assert_eq!(state.total_secs(), Some(100.0));
    }

    #[test]
    fn test_seeded_total_is_kept() {
        let state = TranscodeProgress::with_total(20.0);
        let (state, _) = state.observe("Duration: 01:00:00.00, start: 0");
        let (_, p) = state.observe("time=00:00:05.00");
        assert_eq!(p, Some(0.25));
    }
}
