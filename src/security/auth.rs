//! Bearer token authentication.
//!
//! Resolves the `Authorization` header into exactly one [`Principal`] and
//! attaches it to the request as a [`RequestContext`]. An absent header is
//! anonymous and costs no lookup; a malformed header is rejected before any
//! I/O; a well-formed token is hashed and resolved by the [`UserStore`]
//! under a deadline.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::http::context::{Principal, RequestContext};
use crate::http::error::ApiError;
use crate::resilience::bounded;
use crate::store::{StoreError, TokenHash, TokenScope, UserStore, TOKEN_PLAINTEXT_LEN};

/// Why a credential could not be resolved.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header is not of the form `Bearer <token>`")]
    InvalidCredentialFormat,

    #[error("token is unknown or expired")]
    InvalidOrExpiredCredential,

    #[error("token lookup failed: {0}")]
    Transient(StoreError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            // Both map to the same response; the distinction stays in the logs.
            AuthError::InvalidCredentialFormat | AuthError::InvalidOrExpiredCredential => {
                ApiError::InvalidAuthenticationToken
            }
            AuthError::Transient(cause) => ApiError::Internal(cause.to_string()),
        }
    }
}

/// Resolves bearer tokens to principals.
pub struct TokenAuthenticator {
    users: Arc<dyn UserStore>,
    lookup_timeout: Duration,
}

impl TokenAuthenticator {
    pub fn new(users: Arc<dyn UserStore>, lookup_timeout: Duration) -> Self {
        Self { users, lookup_timeout }
    }

    /// Resolve the principal for an optional `Authorization` header value.
    pub async fn authenticate(&self, header: Option<&HeaderValue>) -> Result<Principal, AuthError> {
        let Some(header) = header else {
            return Ok(Principal::Anonymous);
        };

        let token = parse_bearer(header)?;
        let hash = TokenHash::of(token);

        match bounded(
            self.lookup_timeout,
            self.users.get_for_token(TokenScope::Authentication, &hash),
        )
        .await
        {
            Ok(user) => Ok(Principal::Authenticated(user)),
            Err(StoreError::NotFound) => {
                tracing::debug!(token = ?hash, "Token not found or expired");
                Err(AuthError::InvalidOrExpiredCredential)
            }
            Err(err) => Err(AuthError::Transient(err)),
        }
    }
}

/// Extract the token from `Bearer <token>`, checking its length.
fn parse_bearer(header: &HeaderValue) -> Result<&str, AuthError> {
    let value = header.to_str().map_err(|_| {
        tracing::debug!("Authorization header is not visible ASCII");
        AuthError::InvalidCredentialFormat
    })?;

    let parts: Vec<&str> = value.split(' ').collect();
    let [scheme, token] = parts.as_slice() else {
        tracing::debug!(parts = parts.len(), "Authorization header has wrong shape");
        return Err(AuthError::InvalidCredentialFormat);
    };

    if *scheme != "Bearer" {
        tracing::debug!("Authorization scheme is not Bearer");
        return Err(AuthError::InvalidCredentialFormat);
    }

    if token.len() != TOKEN_PLAINTEXT_LEN {
        tracing::debug!(len = token.len(), "Bearer token has wrong length");
        return Err(AuthError::InvalidCredentialFormat);
    }

    Ok(*token)
}

/// Middleware resolving the principal and attaching the request context.
pub async fn authenticate_middleware(
    State(authenticator): State<Arc<TokenAuthenticator>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let credential = req.headers().get(header::AUTHORIZATION).cloned();
    let outcome = authenticator.authenticate(credential.as_ref()).await;

    let mut response = match outcome {
        Ok(principal) => {
            req.extensions_mut().insert(RequestContext::new(principal));
            next.run(req).await
        }
        Err(err) => ApiError::from(err).into_response(),
    };

    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}
