//! Requested download quality.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Heights with a dedicated label.
pub const KNOWN_HEIGHTS: &[u32] = &[2160, 1440, 1080, 720, 480, 360];

/// Height used when a label is not recognized.
pub const DEFAULT_HEIGHT: u32 = 720;

/// Quality requested by the user.
///
/// Parsing never fails: unrecognized labels fall back to 720p.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    /// Best available streams, no height constraint
    Best,
    /// Target vertical resolution
    Height(u32),
}

impl Quality {
    /// Parse a label such as `"1080p"` or `"best"`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        if label == "best" {
            return Quality::Best;
        }

        label
            .strip_suffix('p')
            .and_then(|h| h.parse::<u32>().ok())
            .filter(|h| KNOWN_HEIGHTS.contains(h))
            .map(Quality::Height)
            .unwrap_or(Quality::Height(DEFAULT_HEIGHT))
    }

    /// Normalized label (used in cache keys and file names).
    pub fn label(&self) -> String {
        match self {
            Quality::Best => "best".to_string(),
            Quality::Height(h) => format!("{}p", h),
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Height(DEFAULT_HEIGHT)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Quality {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Quality::from_label(s))
    }
}

impl Serialize for Quality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for Quality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Quality::from_label(&label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_labels() {
        assert_eq!(Quality::from_label("best"), Quality::Best);
        assert_eq!(Quality::from_label("1080p"), Quality::Height(1080));
        assert_eq!(Quality::from_label("2160P"), Quality::Height(2160));
        assert_eq!(Quality::from_label("480p"), Quality::Height(480));
    }

    #[test]
    fn test_unrecognized_defaults_to_720() {
        assert_eq!(Quality::from_label("potato"), Quality::Height(720));
        assert_eq!(Quality::from_label("999p"), Quality::Height(720));
        assert_eq!(Quality::from_label(""), Quality::Height(720));
    }

    #[test]
    fn test_serde_uses_label() {
        let json = serde_json::to_string(&Quality::Height(1440)).unwrap();
        assert_eq!(json, "\"1440p\"");
        let back: Quality = serde_json::from_str("\"best\"").unwrap();
        assert_eq!(back, Quality::Best);
    }
}
