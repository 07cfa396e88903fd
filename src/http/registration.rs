//! IP-based rate limiting middleware for the registration endpoint.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};

use super::client_ip::client_ip;
use super::response::{apply_rate_limit_headers, rate_limited};
use crate::ratelimit::{format_window, RegistrationLimiter};

pub const REGISTRATION_RATE_LIMITED_MESSAGE: &str =
    "too many registration attempts from this IP, please try again later";

#[derive(Debug, Serialize)]
struct RegistrationDetails {
    retry_after_seconds: u64,
    limit: u64,
    window: String,
}

/// Count the request against its client IP and reject it with `429` once
/// the per-IP quota is exceeded.
///
/// If no client IP can be determined, or the window store fails, the request
/// is forwarded.
pub async fn enforce_registration_limit(
    State(limiter): State<RegistrationLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let prefix = limiter.policy().log_prefix.clone();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    let Some(ip) = client_ip(request.headers(), remote_addr.as_deref()) else {
        warn!(prefix = %prefix, "Could not determine client IP for request");
        return next.run(request).await;
    };

    let decision = match limiter.check(&ip).await {
        Ok(decision) => decision,
        Err(err) => {
            error!(prefix = %prefix, error = %err, "Rate limit store failed");
            return next.run(request).await;
        }
    };

    if decision.is_throttled() {
        let retry_after = decision.retry_after_secs(Utc::now());
        warn!(
            prefix = %prefix,
            ip = %ip,
            count = decision.count,
            limit = decision.limit,
            retry_after_secs = retry_after,
            "IP exceeded registration limit"
        );

        let details = RegistrationDetails {
            retry_after_seconds: retry_after,
            limit: decision.limit,
            window: format_window(decision.window),
        };
        return rate_limited(
            &decision,
            retry_after,
            REGISTRATION_RATE_LIMITED_MESSAGE,
            Some(details),
        );
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::header::RETRY_AFTER;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    use crate::ratelimit::{InMemoryWindowStore, RegistrationPolicy, WindowStore};

    fn app(store: Arc<InMemoryWindowStore>, max_per_ip: u64) -> Router {
        let policy = RegistrationPolicy {
            max_per_ip,
            ..RegistrationPolicy::default()
        };
        let limiter = RegistrationLimiter::new(store, policy);
        Router::new()
            .route("/v1/agents/register", post(|| async { "registered" }))
            .layer(axum::middleware::from_fn_with_state(
                limiter,
                enforce_registration_limit,
            ))
    }

    fn register(forwarded_for: Option<&str>, remote: Option<SocketAddr>) -> Request {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/agents/register");
        if let Some(xff) = forwarded_for {
            builder = builder.header("x-forwarded-for", xff);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(addr) = remote {
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[tokio::test]
    async fn test_forwarded_for_is_the_counting_key() {
        let store = Arc::new(InMemoryWindowStore::new());
        let app = app(store.clone(), 5);
        let remote: SocketAddr = "10.0.0.1:9999".parse().unwrap();

        let response = app
            .oneshot(register(Some("203.0.113.1, 10.0.0.2"), Some(remote)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.get("registration:ip:203.0.113.1").await.unwrap().is_some());
        assert!(store.get("registration:ip:10.0.0.1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ipv6_remote_addr() {
        let store = Arc::new(InMemoryWindowStore::new());
        let app = app(store.clone(), 5);
        let remote: SocketAddr = "[::1]:8080".parse().unwrap();

        app.oneshot(register(None, Some(remote))).await.unwrap();

        assert!(store.get("registration:ip:::1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejection_carries_details() {
        let app = app(Arc::new(InMemoryWindowStore::new()), 2);
        let remote: SocketAddr = "198.51.100.4:5000".parse().unwrap();

        for _ in 0..2 {
            let response = app.clone().oneshot(register(None, Some(remote))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.oneshot(register(None, Some(remote))).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after >= 1);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert_eq!(body["error"]["message"], REGISTRATION_RATE_LIMITED_MESSAGE);
        assert_eq!(body["error"]["details"]["limit"], 2);
        assert_eq!(body["error"]["details"]["window"], "1h0m0s");
        assert_eq!(body["error"]["details"]["retry_after_seconds"], retry_after);
    }

    #[tokio::test]
    async fn test_unknown_ip_fails_open() {
        let store = Arc::new(InMemoryWindowStore::new());
        let app = app(store.clone(), 0);

        let response = app.oneshot(register(None, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_window_elapses() {
        let store = Arc::new(InMemoryWindowStore::new());
        let limiter = RegistrationLimiter::new(
            store,
            RegistrationPolicy {
                max_per_ip: 1,
                window: Duration::from_millis(10),
                ..RegistrationPolicy::default()
            },
        );
        let app = Router::new()
            .route("/v1/agents/register", post(|| async { "registered" }))
            .layer(axum::middleware::from_fn_with_state(
                limiter,
                enforce_registration_limit,
            ));
        let remote: SocketAddr = "192.0.2.9:1234".parse().unwrap();

        app.clone().oneshot(register(None, Some(remote))).await.unwrap();
        let blocked = app.clone().oneshot(register(None, Some(remote))).await.unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

        tokio::time::sleep(Duration::from_millis(15)).await;

        let response = app.oneshot(register(None, Some(remote))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
