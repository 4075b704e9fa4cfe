//! Aspect-ratio crop modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Crop applied to the clip during transcoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AspectMode {
    /// Source aspect ratio preserved
    #[default]
    Original,
    /// Portrait 9:16 for short-form feeds
    Vertical,
    /// Square 1:1
    Square,
    /// Classic 4:3
    Classic,
}

impl AspectMode {
    pub const ALL: &'static [AspectMode] = &[
        AspectMode::Original,
        AspectMode::Vertical,
        AspectMode::Square,
        AspectMode::Classic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectMode::Original => "original",
            AspectMode::Vertical => "vertical",
            AspectMode::Square => "square",
            AspectMode::Classic => "classic",
        }
    }

    /// FFmpeg crop expression, relative to source height.
    ///
    /// Widths are rounded down to an even number for yuv420p encoders.
    /// `None` for [`AspectMode::Original`].
    pub fn crop_filter(&self) -> Option<&'static str> {
        match self {
            AspectMode::Original => None,
            AspectMode::Vertical => Some("crop=trunc(ih*9/16/2)*2:ih"),
            AspectMode::Square => Some("crop=ih:ih"),
            AspectMode::Classic => Some("crop=trunc(ih*4/3/2)*2:ih"),
        }
    }
}

impl fmt::Display for AspectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AspectMode {
    type Err = AspectModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "original" => Ok(AspectMode::Original),
            "vertical" | "9:16" | "portrait" => Ok(AspectMode::Vertical),
            "square" | "1:1" => Ok(AspectMode::Square),
            "classic" | "4:3" => Ok(AspectMode::Classic),
            _ => Err(AspectModeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown aspect mode: {0}")]
pub struct AspectModeParseError(String);
