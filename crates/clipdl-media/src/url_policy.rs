//! Source URL admission.

use url::Url;

use crate::error::{MediaError, MediaResult};

/// Longest URL accepted.
pub const MAX_URL_LEN: usize = 2048;

/// Hosts a job may download from.
pub const ALLOWED_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];

/// Check a user-supplied URL before it reaches the downloader.
///
/// Returns the parsed URL on success.
pub fn admit_url(raw: &str) -> MediaResult<Url> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(MediaError::invalid_url("URL is empty"));
    }
    if trimmed.len() > MAX_URL_LEN {
        return Err(MediaError::invalid_url(format!(
            "URL exceeds {} characters",
            MAX_URL_LEN
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(MediaError::invalid_url("URL contains control characters"));
    }

    let url = Url::parse(trimmed).map_err(|e| MediaError::invalid_url(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(MediaError::invalid_url(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| MediaError::invalid_url("URL has no host"))?;

    if !ALLOWED_HOSTS.contains(&host.as_str()) {
        return Err(MediaError::invalid_url(format!("host '{}' is not supported", host)));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_youtube_hosts() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ",
            "http://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "  https://YOUTU.BE/dQw4w9WgXcQ  ",
        ] {
            assert!(admit_url(url).is_ok(), "{} should be admitted", url);
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        let too_long = format!("https://youtube.com/watch?v={}", "a".repeat(MAX_URL_LEN));
        for url in [
            "",
            "   ",
            too_long.as_str(),
            "https://youtube.com/watch?v=a\u{0007}b",
            "ftp://youtube.com/video",
            "javascript:alert(1)",
            "https://evil.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com.evil.com/watch",
            "https://gaming.youtube.com/watch?v=x",
            "not a url",
        ] {
            assert!(
                matches!(admit_url(url), Err(MediaError::InvalidUrl(_))),
                "{:?} should be rejected",
                url
            );
        }
    }
}
