//! Identity-based rate limiting middleware.
//!
//! ```rust,ignore
//! let state = RateLimitState::new(limiter, Arc::new(ExtensionIdentityResolver));
//! let app = Router::new()
//!     .route("/v1/posts", post(create_post))
//!     .layer(axum::middleware::from_fn_with_state(state, enforce_rate_limit));
//! ```

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use tracing::{debug, warn};

use super::identity::IdentityResolver;
use super::response::{apply_rate_limit_headers, rate_limited, RATE_LIMITED_MESSAGE};
use crate::ratelimit::{Operation, RateLimiter};

/// State shared by every invocation of [`enforce_rate_limit`].
#[derive(Clone)]
pub struct RateLimitState {
    limiter: RateLimiter,
    resolver: Arc<dyn IdentityResolver>,
}

impl RateLimitState {
    pub fn new(limiter: RateLimiter, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { limiter, resolver }
    }
}

/// Count the request against its caller's quota and reject it with `429`
/// once the quota is exceeded.
///
/// Requests without an identity pass through untouched. If the window store
/// fails, the request is forwarded without rate limit headers.
pub async fn enforce_rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(identity) = state.resolver.resolve(&request) else {
        return next.run(request).await;
    };

    let operation = Operation::classify(request.method().as_str(), request.uri().path());

    let decision = match state.limiter.check(&identity, operation).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!(
                error = %err,
                identity = %identity.id,
                operation = %operation,
                "Rate limit store failed, allowing request"
            );
            return next.run(request).await;
        }
    };

    if decision.is_throttled() {
        let retry_after = decision.retry_after_secs(Utc::now());
        warn!(
            key = %decision.key,
            count = decision.count,
            limit = decision.limit,
            retry_after_secs = retry_after,
            "Request rate limited"
        );
        return rate_limited::<()>(&decision, retry_after, RATE_LIMITED_MESSAGE, None);
    }

    debug!(
        key = %decision.key,
        remaining = decision.remaining(),
        "Request admitted"
    );

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::header::RETRY_AFTER;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;
    use tower::ServiceExt;

    use crate::http::identity::ExtensionIdentityResolver;
    use crate::http::response::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
    use crate::ratelimit::{
        Identity, InMemoryWindowStore, LimitPolicy, StoreError, WindowRecord, WindowStore,
    };

    struct FailingStore;

    #[async_trait]
    impl WindowStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<WindowRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn increment_and_get(
            &self,
            _key: &str,
            _window: Duration,
        ) -> Result<WindowRecord, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn app(store: Arc<dyn WindowStore>, policy: LimitPolicy) -> Router {
        let state = RateLimitState::new(
            RateLimiter::new(store, policy),
            Arc::new(ExtensionIdentityResolver),
        );
        Router::new()
            .route("/v1/feed", get(|| async { "ok" }))
            .route("/v1/search", get(|| async { "ok" }))
            .route("/v1/questions", post(|| async { "created" }))
            .layer(axum::middleware::from_fn_with_state(state, enforce_rate_limit))
    }

    fn request(method: &str, path: &str, identity: Option<Identity>) -> Request {
        let mut request = axum::http::Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        if let Some(identity) = identity {
            request.extensions_mut().insert(identity);
        }
        request
    }

    fn header(response: &Response, name: axum::http::HeaderName) -> Option<String> {
        response
            .headers()
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }

    fn agent_policy(general: u64, window: Duration) -> LimitPolicy {
        let mut policy = LimitPolicy::default();
        policy.agent.general = general;
        policy.windows.general = window;
        policy
    }

    #[tokio::test]
    async fn test_basic_throttle() {
        let app = app(
            Arc::new(InMemoryWindowStore::new()),
            agent_policy(3, Duration::from_secs(60)),
        );

        for expected in ["2", "1", "0"] {
            let response = app
                .clone()
                .oneshot(request("GET", "/v1/feed", Some(Identity::agent("A"))))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, X_RATELIMIT_LIMIT).as_deref(), Some("3"));
            assert_eq!(header(&response, X_RATELIMIT_REMAINING).as_deref(), Some(expected));
            assert!(header(&response, X_RATELIMIT_RESET).is_some());
        }

        let response = app
            .oneshot(request("GET", "/v1/feed", Some(Identity::agent("A"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, X_RATELIMIT_REMAINING).as_deref(), Some("0"));
        let retry_after: u64 = header(&response, RETRY_AFTER).unwrap().parse().unwrap();
        assert!(retry_after >= 1);
    }

    #[tokio::test]
    async fn test_window_reset() {
        let app = app(
            Arc::new(InMemoryWindowStore::new()),
            agent_policy(2, Duration::from_millis(10)),
        );
        let send = |app: Router| async move {
            app.oneshot(request("GET", "/v1/feed", Some(Identity::agent("B"))))
                .await
                .unwrap()
        };

        assert_eq!(send(app.clone()).await.status(), StatusCode::OK);
        assert_eq!(send(app.clone()).await.status(), StatusCode::OK);
        assert_eq!(send(app.clone()).await.status(), StatusCode::TOO_MANY_REQUESTS);

        tokio::time::sleep(Duration::from_millis(15)).await;

        let response = send(app).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, X_RATELIMIT_REMAINING).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_unauthenticated_request_passes_untouched() {
        let app = app(
            Arc::new(InMemoryWindowStore::new()),
            agent_policy(0, Duration::from_secs(60)),
        );

        let response = app.oneshot(request("GET", "/v1/feed", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, X_RATELIMIT_LIMIT).is_none());
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let app = app(Arc::new(FailingStore), agent_policy(0, Duration::from_secs(60)));

        let response = app
            .oneshot(request("GET", "/v1/feed", Some(Identity::agent("A"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, X_RATELIMIT_LIMIT).is_none());
        assert!(header(&response, X_RATELIMIT_REMAINING).is_none());
        assert!(header(&response, X_RATELIMIT_RESET).is_none());
    }

    #[tokio::test]
    async fn test_operation_classes_use_their_own_limits() {
        let mut policy = LimitPolicy::default();
        policy.human.posts = 1;
        policy.human.search = 7;
        let app = app(Arc::new(InMemoryWindowStore::new()), policy);
        let human = || Some(Identity::human("u1"));

        let created = app
            .clone()
            .oneshot(request("POST", "/v1/questions", human()))
            .await
            .unwrap();
        assert_eq!(header(&created, X_RATELIMIT_LIMIT).as_deref(), Some("1"));

        let blocked = app
            .clone()
            .oneshot(request("POST", "/v1/questions", human()))
            .await
            .unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

        let search = app
            .oneshot(request("GET", "/v1/search", human()))
            .await
            .unwrap();
        assert_eq!(search.status(), StatusCode::OK);
        assert_eq!(header(&search, X_RATELIMIT_LIMIT).as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_new_account_gets_half_limit() {
        let app = app(
            Arc::new(InMemoryWindowStore::new()),
            agent_policy(5, Duration::from_secs(60)),
        );
        let young = Identity::agent("fresh").created_at(Utc::now() - chrono::Duration::hours(1));

        let response = app
            .oneshot(request("GET", "/v1/feed", Some(young)))
            .await
            .unwrap();

        assert_eq!(header(&response, X_RATELIMIT_LIMIT).as_deref(), Some("2"));
        assert_eq!(header(&response, X_RATELIMIT_REMAINING).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_api_key_tier_limit_applies() {
        let mut policy = LimitPolicy::default();
        policy.api_key_tier_limits.insert("premium".to_string(), 180);
        let store = Arc::new(InMemoryWindowStore::new());
        let app = app(store.clone(), policy);
        let identity = Identity::human("u1").with_api_key("key-1", Some("premium"));

        let response = app
            .oneshot(request("GET", "/v1/feed", Some(identity)))
            .await
            .unwrap();

        assert_eq!(header(&response, X_RATELIMIT_LIMIT).as_deref(), Some("180"));
        assert!(store.get("apikey:key-1:general").await.unwrap().is_some());
        assert!(store.get("human:u1:general").await.unwrap().is_none());
    }
}
