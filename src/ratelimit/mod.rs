//! Rate limiting logic and state management.

mod key;
mod limiter;
mod memory;
mod policy;
mod registration;
mod store;
mod sweeper;

pub use key::RateLimitKey;
pub use limiter::{Decision, RateLimiter};
pub use memory::{Evict, InMemoryWindowStore, ShardedWindowStore};
pub use policy::{ApiKey, EntityClass, EntityLimits, Identity, LimitPolicy, Operation, Windows};
pub use registration::{format_window, RegistrationLimiter, RegistrationPolicy};
pub use store::{StoreError, WindowRecord, WindowStore};
pub use sweeper::{Sweeper, DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL};
