//! HTTP middleware and server for admission control.

mod client_ip;
mod identity;
mod middleware;
mod registration;
mod response;
mod server;

pub use client_ip::{client_ip, host_from_addr};
pub use identity::{ExtensionIdentityResolver, IdentityResolver};
pub use middleware::{enforce_rate_limit, RateLimitState};
pub use registration::{enforce_registration_limit, REGISTRATION_RATE_LIMITED_MESSAGE};
pub use response::{
    apply_rate_limit_headers, rate_limited, RATE_LIMITED, RATE_LIMITED_MESSAGE, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::{HttpServer, Turnstile, REGISTRATION_PATH};
