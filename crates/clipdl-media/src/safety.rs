//! Download safety throttling.
//!
//! Spaces out downloader invocations and varies their request headers so a
//! single user does not trip the remote service's abuse defenses. Tracks how
//! many downloads happened today and surfaces advisory notices.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clipdl_models::SafetyNotice;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::record_throttle;

/// Referer sent with every download.
pub const REFERER: &str = "https://www.youtube.com/";

/// Daily count at which the count notice starts appearing.
pub const DAILY_NOTICE_THRESHOLD: u32 = 10;

/// Daily count at which the one-time slow-down tip appears.
pub const SLOW_DOWN_TIP_THRESHOLD: u32 = 30;

/// Browser user agents rotated across downloads.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Throttle configuration.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Lower bound of the pre-download delay
    pub min_delay: Duration,
    /// Upper bound of the pre-download delay
    pub max_delay: Duration,
    /// `--sleep-interval` passed to the downloader, in seconds
    pub sleep_interval_secs: u64,
    /// `--max-sleep-interval` passed to the downloader, in seconds
    pub max_sleep_interval_secs: u64,
    pub user_agents: Vec<String>,
    /// Where to persist the daily counter; in-memory only when `None`
    pub state_path: Option<PathBuf>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(8),
            sleep_interval_secs: 3,
            max_sleep_interval_secs: 8,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            state_path: None,
        }
    }
}

/// What the next download must do.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyDirectives {
    /// Wait this long before launching the downloader
    pub delay: Duration,
    pub user_agent: String,
    pub referer: String,
    pub sleep_interval_secs: u64,
    pub max_sleep_interval_secs: u64,
    /// Advisory message for the user, if any
    pub notice: Option<SafetyNotice>,
}

/// Persisted download counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyState {
    pub downloads_today: u32,
    pub last_reset: NaiveDate,
    /// The slow-down tip is shown once ever
    pub tip_shown: bool,
}

impl SafetyState {
    fn fresh(today: NaiveDate) -> Self {
        Self {
            downloads_today: 0,
            last_reset: today,
            tip_shown: false,
        }
    }
}

/// Download throttle shared by all jobs.
#[derive(Debug)]
pub struct SafetyThrottle {
    config: SafetyConfig,
    state: Mutex<SafetyState>,
}

impl SafetyThrottle {
    /// Create a throttle, loading persisted state if present.
    ///
    /// A missing or unreadable state file starts from zero.
    pub async fn open(config: SafetyConfig) -> Self {
        let today = Local::now().date_naive();
        let state = match &config.state_path {
            Some(path) => match tokio::fs::read(path).await {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "Corrupt safety state, resetting");
                    SafetyState::fresh(today)
                }),
                Err(_) => SafetyState::fresh(today),
            },
            None => SafetyState::fresh(today),
        };

        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Register one download and return its directives.
    pub async fn prepare(&self) -> SafetyDirectives {
        self.prepare_on(Local::now().date_naive()).await
    }

    /// Register one download happening on `today`.
    pub async fn prepare_on(&self, today: NaiveDate) -> SafetyDirectives {
        let mut state = self.state.lock().await;

        if state.last_reset != today {
            debug!(previous = %state.last_reset, today = %today, "Resetting daily download count");
            state.downloads_today = 0;
            state.last_reset = today;
        }

        state.downloads_today = state.downloads_today.saturating_add(1);
        let count = state.downloads_today;

        let notice = if count >= SLOW_DOWN_TIP_THRESHOLD && !state.tip_shown {
            state.tip_shown = true;
            Some(SafetyNotice::SlowDownTip { count })
        } else if count >= DAILY_NOTICE_THRESHOLD {
            Some(SafetyNotice::DailyCount { count })
        } else {
            None
        };

        self.persist(&state).await;
        drop(state);

        let delay = self.random_delay();
        record_throttle(delay);

        let directives = SafetyDirectives {
            delay,
            user_agent: self.pick_user_agent(),
            referer: REFERER.to_string(),
            sleep_interval_secs: self.config.sleep_interval_secs,
            max_sleep_interval_secs: self
                .config
                .max_sleep_interval_secs
                .max(self.config.sleep_interval_secs),
            notice,
        };

        info!(
            downloads_today = count,
            delay_ms = delay.as_millis() as u64,
            notice = directives.notice.is_some(),
            "Download throttled"
        );

        directives
    }

    /// Current state snapshot.
    pub async fn state(&self) -> SafetyState {
        self.state.lock().await.clone()
    }

    fn random_delay(&self) -> Duration {
        let lo = self.config.min_delay.as_millis() as u64;
        let hi = self.config.max_delay.as_millis() as u64;
        if hi <= lo {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    fn pick_user_agent(&self) -> String {
        self.config
            .user_agents
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENTS[0].to_string())
    }

    async fn persist(&self, state: &SafetyState) {
        let Some(path) = &self.config.state_path else {
            return;
        };

        let bytes = match serde_json::to_vec_pretty(state) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Failed to serialize safety state");
                return;
            }
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "Failed to create safety state dir");
                return;
            }
        }
        if let Err(e) = tokio::fs::write(path, bytes).await {
            warn!(path = %path.display(), error = %e, "Failed to persist safety state");
        }
    }
}
