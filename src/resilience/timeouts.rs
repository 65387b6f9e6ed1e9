//! Timeout enforcement for collaborator lookups.
//!
//! Every storage call on the request path runs under a deadline. A lookup
//! that overruns is cancelled (its future dropped) and reported as a
//! transient [`StoreError::Timeout`], never left to hang the request.

use std::future::Future;
use std::time::Duration;

use crate::store::StoreError;

/// Run `lookup` with a deadline, flattening the timeout into its error type.
pub async fn bounded<T, F>(deadline: Duration, lookup: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, lookup).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline.as_millis())),
    }
}
