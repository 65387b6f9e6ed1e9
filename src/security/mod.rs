//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (Vary hints; answer matched preflights)
//!     → rate_limit.rs (per-client token bucket, keyed by client_ip.rs)
//!     → auth.rs (Authorization → Principal → RequestContext)
//!     → permissions.rs (protected routes only)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Identity failures are reported before permission failures
//! - Clients never learn why a token was rejected

pub mod auth;
pub mod client_ip;
pub mod cors;
pub mod permissions;
pub mod rate_limit;

pub use auth::{authenticate_middleware, AuthError, TokenAuthenticator};
pub use cors::{cors_middleware, CorsNegotiator};
pub use permissions::{require_permission, AuthzError, PermissionAuthorizer, RequiredPermission};
pub use rate_limit::{rate_limit_middleware, RateLimiterRegistry};
