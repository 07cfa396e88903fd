//! IP-based limiting for unauthenticated registration.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::key::RateLimitKey;
use super::limiter::Decision;
use super::store::{StoreError, WindowStore};

/// Flat per-IP registration policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationPolicy {
    /// Maximum registrations per IP per window
    pub max_per_ip: u64,
    pub window: Duration,
    /// Count at which an IP is logged as suspicious; 0 disables logging.
    /// Never affects the accept/reject decision.
    pub suspicious_threshold: u64,
    /// Prefix attached to every log event of this limiter
    pub log_prefix: String,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            max_per_ip: 5,
            window: Duration::from_secs(3600),
            suspicious_threshold: 10,
            log_prefix: "registration".to_string(),
        }
    }
}

/// Rate limiter keyed by client IP.
#[derive(Clone)]
pub struct RegistrationLimiter {
    store: Arc<dyn WindowStore>,
    policy: Arc<RegistrationPolicy>,
}

impl RegistrationLimiter {
    pub fn new(store: Arc<dyn WindowStore>, policy: RegistrationPolicy) -> Self {
        Self {
            store,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &RegistrationPolicy {
        &self.policy
    }

    /// Count one registration attempt from `ip`.
    pub async fn check(&self, ip: &str) -> Result<Decision, StoreError> {
        let key = RateLimitKey::registration(ip).to_string();
        let record = self
            .store
            .increment_and_get(&key, self.policy.window)
            .await?;
        let decision = Decision::from_record(record, self.policy.max_per_ip, self.policy.window);

        let threshold = self.policy.suspicious_threshold;
        if threshold > 0 && decision.count >= threshold {
            warn!(
                prefix = %self.policy.log_prefix,
                ip = %ip,
                count = decision.count,
                threshold = threshold,
                "Suspicious registration pattern"
            );
        }

        Ok(decision)
    }
}

/// Render a window length the way the registration error details report it,
/// e.g. `1h0m0s`, `10m0s`, `30s`, `250ms`.
pub fn format_window(window: Duration) -> String {
    let secs = window.as_secs();
    if secs == 0 {
        return format!("{}ms", window.as_millis());
    }

    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
