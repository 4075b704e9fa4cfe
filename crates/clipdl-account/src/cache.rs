//! Account-state cache with an adaptive validity window.
//!
//! One snapshot of device/license/credit state, guarded by a single
//! `RwLock` owned by the cache. How long a snapshot stays usable depends on
//! the account: metered accounts near exhaustion are refetched sooner, and
//! local changes (an explicit invalidation or an optimistic credit update)
//! shorten the window until the server confirms.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::record_cache_lookup;

// =============================================================================
// Constants
// =============================================================================

/// Licensed accounts are unmetered; staleness is low-risk.
pub const LICENSED_WINDOW: Duration = Duration::from_secs(600);

/// Unlicensed accounts with credits to spare.
pub const UNLICENSED_WINDOW: Duration = Duration::from_secs(180);

/// Unlicensed accounts on their last credit.
pub const LAST_CREDIT_WINDOW: Duration = Duration::from_secs(30);

/// Window after a credit update that changed the value.
pub const CREDIT_UPDATE_WINDOW: Duration = Duration::from_secs(60);

/// How long an explicit invalidation counts as recent.
pub const RECENT_INVALIDATION: Duration = Duration::from_secs(30);

/// How long a changing credit update counts as recent.
pub const RECENT_CREDIT_UPDATE: Duration = Duration::from_secs(60);

// =============================================================================
// Snapshot
// =============================================================================

/// Device, license and credit state as last reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub device_id: String,
    pub free_credits: u32,
    pub license_active: bool,
    pub fetched_at: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn new(device_id: impl Into<String>, free_credits: u32, license_active: bool) -> Self {
        Self {
            device_id: device_id.into(),
            free_credits,
            license_active,
            fetched_at: Utc::now(),
        }
    }

    /// Whether the account may start another job.
    pub fn can_start_job(&self) -> bool {
        self.license_active || self.free_credits > 0
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Default)]
struct CacheState {
    snapshot: Option<AccountSnapshot>,
    stored_at: Option<Instant>,
    last_invalidation: Option<Instant>,
    last_credit_update: Option<Instant>,
}

impl CacheState {
    fn recent_invalidation(&self, now: Instant) -> bool {
        self.last_invalidation
            .is_some_and(|at| now.duration_since(at) < RECENT_INVALIDATION)
    }

    fn recent_credit_update(&self, now: Instant) -> bool {
        self.last_credit_update
            .is_some_and(|at| now.duration_since(at) < RECENT_CREDIT_UPDATE)
    }

    fn window(&self, has_license: bool, credits: u32, now: Instant) -> Duration {
        if self.recent_invalidation(now) {
            Duration::ZERO
        } else if self.recent_credit_update(now) {
            CREDIT_UPDATE_WINDOW
        } else if has_license {
            LICENSED_WINDOW
        } else if credits == 1 {
            LAST_CREDIT_WINDOW
        } else {
            UNLICENSED_WINDOW
        }
    }
}

/// In-memory cache of the account snapshot.
///
/// All access goes through these methods; snapshots are handed out as
/// clones.
#[derive(Debug, Default)]
pub struct AccountCache {
    state: RwLock<CacheState>,
}

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot wholesale. Clears any pending invalidation.
    pub async fn put(&self, snapshot: AccountSnapshot) {
        let mut state = self.state.write().await;
        debug!(
            device_id = %snapshot.device_id,
            free_credits = snapshot.free_credits,
            license_active = snapshot.license_active,
            "Caching account snapshot"
        );
        state.snapshot = Some(snapshot);
        state.stored_at = Some(Instant::now());
        state.last_invalidation = None;
    }

    /// Cached snapshot and its age, if younger than `max_age`.
    ///
    /// Without `max_age` the snapshot's own validity window applies.
    pub async fn get(&self, max_age: Option<Duration>) -> Option<(AccountSnapshot, Duration)> {
        let state = self.state.read().await;
        let now = Instant::now();

        let result = match (&state.snapshot, state.stored_at) {
            (Some(snapshot), Some(stored_at)) => {
                let age = now.duration_since(stored_at);
                let limit = max_age.unwrap_or_else(|| {
                    state.window(snapshot.license_active, snapshot.free_credits, now)
                });
                (age < limit).then(|| (snapshot.clone(), age))
            }
            _ => None,
        };

        record_cache_lookup(result.is_some());
        result
    }

    /// Set the credit count in place.
    ///
    /// Only a change of value marks the update as recent.
    pub async fn update_credits(&self, credits: u32) {
        let mut state = self.state.write().await;
        let Some(snapshot) = state.snapshot.as_mut() else {
            return;
        };

        if snapshot.free_credits != credits {
            debug!(from = snapshot.free_credits, to = credits, "Updating cached credits");
            snapshot.free_credits = credits;
            state.last_credit_update = Some(Instant::now());
        }
    }

    /// Force the next `get` to miss until a fresh `put`.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.last_invalidation = Some(Instant::now());
        debug!("Account cache invalidated");
    }

    pub async fn has_recent_invalidation(&self) -> bool {
        self.state.read().await.recent_invalidation(Instant::now())
    }

    pub async fn has_recent_credit_update(&self) -> bool {
        self.state.read().await.recent_credit_update(Instant::now())
    }

    /// Validity window for an account in the given state.
    pub async fn validity_window(&self, has_license: bool, credits: u32) -> Duration {
        self.state
            .read()
            .await
            .window(has_license, credits, Instant::now())
    }
}

// =============================================================================
// Tests
// =============================================================================
