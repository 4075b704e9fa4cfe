//! Utility functions for content-id extraction.

use url::Url;

/// Errors that can occur during YouTube ID extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YoutubeIdError {
    /// URL is not a valid YouTube URL
    InvalidYoutubeUrl,
    /// Video ID has invalid format
    InvalidVideoId,
    /// Video ID not found in URL
    VideoIdNotFound,
}

impl std::fmt::Display for YoutubeIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            YoutubeIdError::InvalidYoutubeUrl => write!(f, "URL is not a valid YouTube URL"),
            YoutubeIdError::InvalidVideoId => write!(f, "Video ID has invalid format"),
            YoutubeIdError::VideoIdNotFound => write!(f, "Video ID not found in URL"),
        }
    }
}

impl std::error::Error for YoutubeIdError {}

/// Result type for YouTube ID extraction.
pub type YoutubeIdResult<T> = Result<T, YoutubeIdError>;

/// Extract the YouTube video ID from a URL.
///
/// Supports:
/// - https://youtube.com/watch?v=VIDEO_ID (any subdomain)
/// - https://youtu.be/VIDEO_ID
/// - https://youtube.com/embed/VIDEO_ID
/// - https://youtube.com/v/VIDEO_ID
/// - https://youtube.com/shorts/VIDEO_ID
///
/// Returns the 11-character video ID, used as the content id in cache keys.
pub fn extract_youtube_id(url: &str) -> YoutubeIdResult<String> {
    let parsed = Url::parse(url.trim()).map_err(|_| YoutubeIdError::InvalidYoutubeUrl)?;
    let host = parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or(YoutubeIdError::InvalidYoutubeUrl)?;

    let is_short_host = host == "youtu.be" || host == "www.youtu.be";
    let is_youtube_host = host == "youtube.com" || host.ends_with(".youtube.com");
    if !is_short_host && !is_youtube_host {
        return Err(YoutubeIdError::InvalidYoutubeUrl);
    }

    let mut segments = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter();

    let candidate = if is_short_host {
        segments.next().map(str::to_string)
    } else {
        match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some("embed") | Some("v") | Some("shorts") | Some("live") => {
                segments.next().map(str::to_string)
            }
            _ => None,
        }
    };

    match candidate {
        Some(id) if !id.is_empty() => validate_youtube_id(id),
        _ => Err(YoutubeIdError::VideoIdNotFound),
    }
}

/// Check if string contains only valid YouTube ID characters
fn is_valid_youtube_id_chars(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validate YouTube video ID format and return it
fn validate_youtube_id(id: String) -> YoutubeIdResult<String> {
    // YouTube video IDs are exactly 11 characters
    if id.len() != 11 || !is_valid_youtube_id_chars(&id) {
        return Err(YoutubeIdError::InvalidVideoId);
    }

    Ok(id)
}
