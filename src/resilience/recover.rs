//! Panic isolation for request handling.
//!
//! Installed as the outermost layer so a panic anywhere in the pipeline or
//! a handler becomes one generic 500 response instead of a dropped
//! connection. The response carries `Connection: close` so the connection
//! is not reused after the fault. Client disconnects and write failures are
//! not panics and never reach this layer.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderValue, Response};
use axum::response::IntoResponse;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};

use crate::http::error::ApiError;

/// Converts caught panics into internal-error responses.
#[derive(Debug, Clone, Default)]
pub struct PanicRecoverer {
    recovered: Arc<AtomicU64>,
}

impl PanicRecoverer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer that catches panics and answers with this recoverer.
    pub fn layer(&self) -> CatchPanicLayer<Self> {
        CatchPanicLayer::custom(self.clone())
    }

    /// Number of panics recovered since startup.
    pub fn recovered(&self) -> u64 {
        self.recovered.load(Ordering::Relaxed)
    }
}

/// Best-effort rendering of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else {
        "panic with non-string payload".to_string()
    }
}

impl ResponseForPanic for PanicRecoverer {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Self::ResponseBody> {
        self.recovered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("http_panics_recovered_total").increment(1);

        let message = panic_message(err.as_ref());
        let mut response = ApiError::Internal(format!("panic in request handler: {message}")).into_response();
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        response
    }
}
