//! Rate limit headers and JSON error envelopes.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::ratelimit::Decision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const RATE_LIMITED_MESSAGE: &str = "too many requests, please slow down";

#[derive(Debug, Serialize)]
struct ErrorEnvelope<D: Serialize> {
    error: ErrorBody<D>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<D: Serialize> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<D>,
}

/// Set `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining()));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at().timestamp()),
    );
}

/// Build a `429 Too Many Requests` response carrying `Retry-After` and the
/// rate limit headers for `decision`.
pub fn rate_limited<D: Serialize>(
    decision: &Decision,
    retry_after_secs: u64,
    message: &str,
    details: Option<D>,
) -> Response {
    let body = ErrorEnvelope {
        error: ErrorBody {
            code: RATE_LIMITED,
            message: message.to_string(),
            details,
        },
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    apply_rate_limit_headers(headers, decision);
    response
}

/// Build a JSON error response without details.
pub fn error_response(status: StatusCode, code: &'static str, message: &str) -> Response {
    let body: ErrorEnvelope<()> = ErrorEnvelope {
        error: ErrorBody {
            code,
            message: message.to_string(),
            details: None,
        },
    };
    (status, Json(body)).into_response()
}
