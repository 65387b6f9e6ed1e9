//! Capability checks for protected routes.
//!
//! Identity failures are always reported before permission failures:
//! anonymous → 401, not activated → 403, missing code → 403.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::http::context::{Principal, RequestContext};
use crate::http::error::ApiError;
use crate::resilience::bounded;
use crate::store::{PermissionStore, StoreError};

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("account not activated")]
    AccountNotActivated,

    #[error("missing permission {0}")]
    PermissionDenied(&'static str),

    #[error("permission lookup failed: {0}")]
    Transient(StoreError),
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::AuthenticationRequired => ApiError::AuthenticationRequired,
            AuthzError::AccountNotActivated => ApiError::InactiveAccount,
            AuthzError::PermissionDenied(_) => ApiError::NotPermitted,
            AuthzError::Transient(cause) => ApiError::Internal(cause.to_string()),
        }
    }
}

pub struct PermissionAuthorizer {
    permissions: Arc<dyn PermissionStore>,
    lookup_timeout: Duration,
}

impl PermissionAuthorizer {
    pub fn new(permissions: Arc<dyn PermissionStore>, lookup_timeout: Duration) -> Self {
        Self {
            permissions,
            lookup_timeout,
        }
    }

    /// Admit the request iff its principal is activated and holds `code`.
    pub async fn authorize(&self, ctx: &RequestContext, code: &'static str) -> Result<(), AuthzError> {
        let user = match ctx.principal() {
            Principal::Anonymous => return Err(AuthzError::AuthenticationRequired),
            Principal::Authenticated(user) => user,
        };

        if !user.activated {
            return Err(AuthzError::AccountNotActivated);
        }

        let held = bounded(self.lookup_timeout, self.permissions.get_all_for_user(user.id))
            .await
            .map_err(AuthzError::Transient)?;

        if held.includes(code) {
            Ok(())
        } else {
            tracing::debug!(user_id = user.id, permission = code, "Permission denied");
            Err(AuthzError::PermissionDenied(code))
        }
    }
}

/// Middleware state naming the code a route requires.
#[derive(Clone)]
pub struct RequiredPermission {
    pub authorizer: Arc<PermissionAuthorizer>,
    pub code: &'static str,
}

impl RequiredPermission {
    pub fn new(authorizer: Arc<PermissionAuthorizer>, code: &'static str) -> Self {
        Self { authorizer, code }
    }
}

/// Route layer rejecting principals without the required permission.
pub async fn require_permission(
    State(required): State<RequiredPermission>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
        return ApiError::Internal("request context missing before permission check".into()).into_response();
    };

    match required.authorizer.authorize(&ctx, required.code).await {
        Ok(()) => next.run(req).await,
        Err(err) => ApiError::from(err).into_response(),
    }
}
