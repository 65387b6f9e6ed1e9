//! Per-request identity context.
//!
//! The authentication stage resolves exactly one [`Principal`] and attaches
//! it as a [`RequestContext`]. Later stages and handlers receive it as an
//! explicit value; a missing context is an internal error, not a panic.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::http::error::ApiError;
use crate::store::User;

/// Identity resolved from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// No credential was presented.
    Anonymous,
    /// A credential resolved to a stored user.
    Authenticated(User),
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::Anonymous => None,
            Principal::Authenticated(user) => Some(user),
        }
    }
}

/// Immutable context carried alongside a request once it is authenticated.
#[derive(Debug, Clone)]
pub struct RequestContext {
    principal: Principal,
}

impl RequestContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn anonymous() -> Self {
        Self::new(Principal::Anonymous)
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| ApiError::Internal("request context missing; authentication layer not installed".into()))
    }
}
