//! Timestamp parsing and validation utilities.
//!
//! Clip boundaries are accepted only in strict `HH:MM:SS` form so that
//! output file names derived from them are reproducible.

/// Parse a strict `HH:MM:SS` timestamp to total seconds.
///
/// Hours are two or more digits, minutes and seconds exactly two digits
/// in `00..=59`. Fractions, signs and whitespace are rejected, as are
/// hour counts too large to express in seconds.
///
/// # Examples
/// ```
/// use clipdl_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400);
/// assert!(parse_timestamp("1:30:00").is_err());
/// ```
pub fn parse_timestamp(ts: &str) -> Result<u64, TimestampError> {
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() != 3 {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if parts[0].len() < 2
        || parts[1].len() != 2
        || parts[2].len() != 2
        || !parts.iter().all(|p| all_digits(p))
    {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    let hours: u64 = parts[0]
        .parse()
        .map_err(|_| TimestampError::InvalidValue("hours", parts[0].to_string()))?;
    let minutes: u64 = parts[1]
        .parse()
        .map_err(|_| TimestampError::InvalidValue("minutes", parts[1].to_string()))?;
    let seconds: u64 = parts[2]
        .parse()
        .map_err(|_| TimestampError::InvalidValue("seconds", parts[2].to_string()))?;

    if minutes > 59 {
        return Err(TimestampError::InvalidValue("minutes", parts[1].to_string()));
    }
    if seconds > 59 {
        return Err(TimestampError::InvalidValue("seconds", parts[2].to_string()));
    }

    hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes * 60 + seconds))
        .ok_or_else(|| TimestampError::InvalidValue("hours", parts[0].to_string()))
}

/// Format seconds into `HH:MM:SS`.
pub fn format_seconds(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

/// Validated start/end pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipRange {
    /// Start timestamp as given (HH:MM:SS)
    pub start: String,
    /// End timestamp as given (HH:MM:SS)
    pub end: String,
    pub start_secs: u64,
    pub end_secs: u64,
}

impl ClipRange {
    /// Clip length in seconds.
    pub fn duration_secs(&self) -> u64 {
        self.end_secs - self.start_secs
    }

    /// File-name-safe form, e.g. `00-10-30_to_00-20-45`.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_to_{}",
            self.start.replace(':', "-"),
            self.end.replace(':', "-")
        )
    }
}

/// Validate a start/end timestamp pair; end must be strictly after start.
pub fn validate_clip_range(start: &str, end: &str) -> Result<ClipRange, TimestampError> {
    let start_secs = parse_timestamp(start)?;
    let end_secs = parse_timestamp(end)?;

    if end_secs <= start_secs {
        return Err(TimestampError::StartNotBeforeEnd);
    }

    Ok(ClipRange {
        start: start.to_string(),
        end: end.to_string(),
        start_secs,
        end_secs,
    })
}

/// Timestamp parsing/validation error.
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampError {
    /// Timestamp string is empty
    Empty,
    /// Invalid numeric value for a component
    InvalidValue(&'static str, String),
    /// Not in HH:MM:SS form
    InvalidFormat(String),
    /// End time is not after start time
    StartNotBeforeEnd,
}

impl std::fmt::Display for TimestampError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Timestamp cannot be empty"),
            Self::InvalidValue(component, value) => {
                write!(f, "Invalid {} value: {}", component, value)
            }
            Self::InvalidFormat(ts) => {
                write!(f, "Invalid timestamp format '{}'. Use HH:MM:SS", ts)
            }
            Self::StartNotBeforeEnd => write!(f, "End time must be after start time"),
        }
    }
}

impl std::error::Error for TimestampError {}
