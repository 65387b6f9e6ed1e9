//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, pipeline layers)
//!     → request.rs (request ID)
//!     → [security + observability layers]
//!     → context.rs (RequestContext extracted by handlers)
//!     → handlers.rs (business logic)
//!     → error.rs (ApiError → status + JSON body)
//!     → Send to client
//! ```

pub mod context;
pub mod error;
pub mod handlers;
pub mod request;
pub mod server;

pub use context::{Principal, RequestContext};
pub use error::ApiError;
pub use request::{RequestUuid, X_REQUEST_ID};
pub use server::{AppState, Collaborators, HttpServer};
