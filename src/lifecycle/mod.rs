//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → ShutdownCoordinator::trigger
//!
//! Shutdown (shutdown.rs):
//!     Running → ShuttingDown: stop accepting, grace period for in-flight requests
//!     ShuttingDown → Stopped: background task set drained
//!
//! Background work (background.rs):
//!     handler spawns task → count +1 → task ends (or panics) → count -1
//! ```
//!
//! # Design Decisions
//! - Outstanding background work is never abandoned unless a deadline is configured
//! - The grace period bounds the listener, not the requests it already accepted
//! - Every failure during shutdown surfaces in the final result

pub mod background;
pub mod shutdown;
pub mod signals;

pub use background::{BackgroundTasks, TaskGuard};
pub use shutdown::{ShutdownCoordinator, ShutdownError, ShutdownState};
