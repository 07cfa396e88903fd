//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::policy::{Identity, LimitPolicy, Operation};
use super::store::{to_chrono, StoreError, WindowRecord, WindowStore};

/// Outcome of counting one request against a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// The counting key
    pub key: String,
    /// Resolved limit, after any tier override or new-account discount
    pub limit: u64,
    /// Post-increment count in the current window
    pub count: u64,
    pub window_start: DateTime<Utc>,
    pub window: Duration,
}

impl Decision {
    pub fn from_record(record: WindowRecord, limit: u64, window: Duration) -> Self {
        Self {
            key: record.key,
            limit,
            count: record.count,
            window_start: record.window_start,
            window,
        }
    }

    /// Requests left in the current window, never negative.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }

    /// The request that pushes the count past the limit is the first one
    /// rejected; reaching the limit exactly is still allowed.
    pub fn is_throttled(&self) -> bool {
        self.count > self.limit
    }

    /// When the current window ends, clamped to the latest representable
    /// instant for windows too long to add.
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.window_start
            .checked_add_signed(to_chrono(self.window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Seconds until the window ends, rounded up and at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let remaining = self.reset_at() - now;
        if remaining <= chrono::Duration::zero() {
            return 1;
        }
        let secs = remaining.num_seconds() as u64;
        let partial = u64::from(remaining.subsec_nanos() > 0);
        (secs + partial).max(1)
    }
}

/// Identity-based rate limiter.
///
/// This struct is cheap to clone and can be shared across request tasks.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    policy: Arc<LimitPolicy>,
}

impl RateLimiter {
    /// Create a new rate limiter over `store` enforcing `policy`.
    pub fn new(store: Arc<dyn WindowStore>, policy: LimitPolicy) -> Self {
        Self {
            store,
            policy: Arc::new(policy),
        }
    }

    /// Count one request from `identity` performing `operation`.
    ///
    /// Store failures are returned to the caller, which is expected to fail
    /// open.
    pub async fn check(
        &self,
        identity: &Identity,
        operation: Operation,
    ) -> Result<Decision, StoreError> {
        let key = identity.rate_limit_key(operation).to_string();
        let (limit, window) = self.policy.resolve(identity, operation, Utc::now());

        trace!(
            key = %key,
            limit = limit,
            window_ms = window.as_millis() as u64,
            "Checking rate limit"
        );

        let record = self.store.increment_and_get(&key, window).await?;
        let decision = Decision::from_record(record, limit, window);

        if decision.is_throttled() {
            debug!(
                key = %decision.key,
                count = decision.count,
                limit = decision.limit,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }
}
