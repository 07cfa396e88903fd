//! HTTP server and router assembly.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{error, info, warn};

use super::identity::{ExtensionIdentityResolver, IdentityResolver};
use super::middleware::{enforce_rate_limit, RateLimitState};
use super::registration::enforce_registration_limit;
use super::response::error_response;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::{
    LimitPolicy, RateLimitKey, RateLimiter, RegistrationLimiter, RegistrationPolicy, WindowStore,
};

/// Path of the unauthenticated agent registration endpoint.
pub const REGISTRATION_PATH: &str = "/v1/agents/register";

/// Admission control for an API router.
///
/// Both limiters share one window store; their key namespaces never overlap.
#[derive(Clone)]
pub struct Turnstile {
    store: Arc<dyn WindowStore>,
    limiter: RateLimiter,
    registration: RegistrationLimiter,
    resolver: Arc<dyn IdentityResolver>,
}

impl Turnstile {
    pub fn new(
        store: Arc<dyn WindowStore>,
        policy: LimitPolicy,
        registration: RegistrationPolicy,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(store.clone(), policy),
            registration: RegistrationLimiter::new(store.clone(), registration),
            store,
            resolver: Arc::new(ExtensionIdentityResolver),
        }
    }

    /// Replace the identity resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    /// Wrap `api` in the identity limiter and `registration` in the IP
    /// limiter as well, then add an unlimited `/health` route.
    pub fn wrap(&self, api: Router, registration: Router) -> Router {
        let registration = registration.layer(from_fn_with_state(
            self.registration.clone(),
            enforce_registration_limit,
        ));
        let state = RateLimitState::new(self.limiter.clone(), self.resolver.clone());

        Router::new()
            .route("/health", get(health))
            .merge(
                api.merge(registration)
                    .layer(from_fn_with_state(state, enforce_rate_limit)),
            )
    }

    /// The service's own routes: key inspection, a registration placeholder
    /// and a JSON 404 fallback.
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/v1/ratelimits/:key", get(inspect_key))
            .fallback(not_found)
            .with_state(self.store.clone());
        let registration = Router::new().route(REGISTRATION_PATH, post(registration_not_mounted));

        self.wrap(api, registration)
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn inspect_key(
    State(store): State<Arc<dyn WindowStore>>,
    Path(key): Path<String>,
) -> Response {
    if RateLimitKey::parse(&key).is_none() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_KEY",
            "key is not in a known rate limit namespace",
        );
    }

    match store.get(&key).await {
        Ok(Some(record)) => Json(serde_json::json!({
            "data": {
                "key": record.key,
                "count": record.count,
                "window_start": record.window_start.to_rfc3339(),
            }
        }))
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "no active window for key"),
        Err(err) => {
            warn!(key = %key, error = %err, "Window store lookup failed");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "rate limit store unavailable",
            )
        }
    }
}

async fn registration_not_mounted() -> Response {
    error_response(
        StatusCode::NOT_IMPLEMENTED,
        "NOT_IMPLEMENTED",
        "registration handler is not mounted on this instance",
    )
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "resource not found")
}

/// HTTP server for the admission-controlled API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        })
    }
}
