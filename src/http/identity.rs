//! Caller identity resolution.

use axum::extract::Request;

use crate::ratelimit::Identity;

/// Resolves the caller of a request.
///
/// Implementations return `None` when the request carries no identity at
/// all; such requests are left to the authentication layer.
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve(&self, request: &Request) -> Option<Identity>;
}

/// Reads the [`Identity`] an upstream authentication layer stored in the
/// request extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionIdentityResolver;

impl IdentityResolver for ExtensionIdentityResolver {
    fn resolve(&self, request: &Request) -> Option<Identity> {
        request
            .extensions()
            .get::<Identity>()
            .filter(|identity| !identity.id.is_empty())
            .cloned()
    }
}

impl<F> IdentityResolver for F
where
    F: Fn(&Request) -> Option<Identity> + Send + Sync + 'static,
{
    fn resolve(&self, request: &Request) -> Option<Identity> {
        self(request)
    }
}
