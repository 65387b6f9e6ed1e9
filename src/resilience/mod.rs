//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Every request:
//!     → recover.rs (outermost: panic → 500 + Connection: close)
//!
//! Collaborator lookups on the request path:
//!     → timeouts.rs (deadline; overrun → transient StoreError::Timeout)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every lookup on the request path has a deadline
//! - Panics are caught at exactly one layer; business code uses Result
//! - A caught panic closes the connection it happened on

pub mod recover;
pub mod timeouts;

pub use recover::PanicRecoverer;
pub use timeouts::bounded;
