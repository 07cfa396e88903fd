//! Window store trait for abstracting counter backends.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors reported by a window store.
///
/// Callers treat every store error as informational and fail open.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("window store unavailable: {0}")]
    Unavailable(String),
}

/// Consumption within one fixed counting window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    /// The counting key this record belongs to
    pub key: String,
    /// Requests accepted into the current window, always at least 1
    pub count: u64,
    /// When the current window began
    pub window_start: DateTime<Utc>,
}

impl WindowRecord {
    /// Start a fresh window for `key` at `now`.
    pub fn fresh(key: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            count: 1,
            window_start: now,
        }
    }

    /// Whether a window of `window` length starting at `window_start` has
    /// elapsed by `now`.
    pub fn is_expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        elapsed_since(self.window_start, now) >= window
    }
}

/// Trait for window store implementations.
///
/// This trait abstracts over the in-memory stores shipped with this crate
/// and any external cache or database-backed store, so the middleware can
/// work with either.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Look up the record for `key` without mutating it.
    async fn get(&self, key: &str) -> Result<Option<WindowRecord>, StoreError>;

    /// Atomically count one request against `key`.
    ///
    /// Starts a fresh window (`count = 1`) when no record exists or the
    /// existing window has elapsed, otherwise increments the count by one.
    async fn increment_and_get(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowRecord, StoreError>;
}

/// Time elapsed between `start` and `now`, zero if the clock went backwards.
pub(crate) fn elapsed_since(start: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - start).to_std().unwrap_or(Duration::ZERO)
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
