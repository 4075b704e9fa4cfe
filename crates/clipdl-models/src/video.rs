//! Video metadata models.

use serde::{Deserialize, Serialize};

/// Lightweight metadata about a source video.
///
/// Cached independently of the payload so it can be served without the
/// (large) video file being present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VideoMetadata {
    /// Platform content id (YouTube video id), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// Source URL the metadata was obtained for
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub title: String,
    /// Duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
}

/// Subset of the downloader's info JSON that we consume.
#[derive(Debug, Deserialize)]
struct InfoJson {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    webpage_url: Option<String>,
}

impl VideoMetadata {
    /// Minimal metadata when nothing but the URL is known.
    pub fn for_url(source_url: impl Into<String>, content_id: Option<String>) -> Self {
        Self {
            content_id,
            source_url: source_url.into(),
            ..Default::default()
        }
    }

    /// Parse the info JSON written by `yt-dlp --write-info-json` / `--dump-json`.
    pub fn from_info_json(json: &str, fallback_url: &str) -> Result<Self, serde_json::Error> {
        let info: InfoJson = serde_json::from_str(json)?;
        Ok(Self {
            content_id: info.id,
            source_url: info.webpage_url.unwrap_or_else(|| fallback_url.to_string()),
            title: info.title.unwrap_or_default(),
            duration_secs: info.duration,
            uploader: info.uploader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_info_json() {
        let json = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "duration": 212,
            "uploader": "Rick Astley",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "formats": [{"format_id": "18"}]
        }"#;

        let meta = VideoMetadata::from_info_json(json, "https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(meta.content_id.as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(meta.title, "Never Gonna Give You Up");
        assert_eq!(meta.duration_secs, Some(212.0));
        assert_eq!(meta.uploader.as_deref(), Some("Rick Astley"));
        assert!(meta.source_url.contains("watch?v="));
    }

    #[test]
    fn test_from_info_json_missing_fields() {
        let meta = VideoMetadata::from_info_json("{}", "https://youtu.be/x").unwrap();
        assert_eq!(meta.source_url, "https://youtu.be/x");
        assert!(meta.title.is_empty());
        assert!(meta.content_id.is_none());
    }
}
