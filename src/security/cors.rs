//! Cross-origin negotiation.
//!
//! Origins are matched by exact string equality against a static allow
//! list. A matched preflight is answered here and never reaches a handler;
//! anything unmatched passes through with only the `Vary` hints added.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

const ALLOWED_METHODS: &str = "OPTIONS, PUT, PATCH, DELETE";
const ALLOWED_HEADERS: &str = "Authorization, Content-Type";

pub struct CorsNegotiator {
    trusted_origins: Vec<String>,
}

impl CorsNegotiator {
    pub fn new(trusted_origins: Vec<String>) -> Self {
        Self { trusted_origins }
    }

    /// The configured origin equal to `origin`, if any.
    pub fn matched_origin(&self, origin: &str) -> Option<&str> {
        self.trusted_origins
            .iter()
            .map(String::as_str)
            .find(|trusted| *trusted == origin)
    }
}

fn is_preflight<B>(req: &Request<B>) -> bool {
    req.method() == Method::OPTIONS
        && req.headers().contains_key(header::ORIGIN)
        && req.headers().contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

fn append_vary(headers: &mut HeaderMap) {
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    headers.append(header::VARY, HeaderValue::from_static("Access-Control-Request-Method"));
}

pub async fn cors_middleware(
    State(cors): State<Arc<CorsNegotiator>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let allow_origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .and_then(|origin| cors.matched_origin(origin))
        .and_then(|origin| HeaderValue::from_str(origin).ok());

    let Some(allow_origin) = allow_origin else {
        let mut response = next.run(req).await;
        append_vary(response.headers_mut());
        return response;
    };

    let mut response = if is_preflight(&req) {
        let mut preflight = StatusCode::OK.into_response();
        let headers = preflight.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
        preflight
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    append_vary(headers);
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{middleware, routing::any, Router};
    use tower::ServiceExt;

    fn app(hits: Arc<AtomicUsize>) -> Router {
        let cors = Arc::new(CorsNegotiator::new(vec!["https://allowed.example".to_string()]));
        Router::new()
            .route(
                "/v1/movies/{id}",
                any(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "handled"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(cors, cors_middleware))
    }

    fn vary(response: &Response) -> Vec<&str> {
        response
            .headers()
            .get_all(header::VARY)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    #[tokio::test]
    async fn matched_preflight_short_circuits() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits.clone())
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/v1/movies/1")
                    .header(header::ORIGIN, "https://allowed.example")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://allowed.example");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], ALLOWED_HEADERS);
        assert_eq!(vary(&response), ["Origin", "Access-Control-Request-Method"]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn matched_simple_request_echoes_origin() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits.clone())
            .oneshot(
                Request::builder()
                    .uri("/v1/movies/1")
                    .header(header::ORIGIN, "https://allowed.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://allowed.example");
        assert!(!response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_origin_is_forwarded_without_cors_headers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits.clone())
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/v1/movies/1")
                    .header(header::ORIGIN, "https://allowed.example.evil")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(!response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        assert_eq!(vary(&response), ["Origin", "Access-Control-Request-Method"]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn matching_is_exact() {
        let cors = CorsNegotiator::new(vec!["https://allowed.example".to_string()]);
        assert!(cors.matched_origin("https://allowed.example").is_some());
        assert!(cors.matched_origin("https://allowed.example/").is_none());
        assert!(cors.matched_origin("http://allowed.example").is_none());
        assert!(cors.matched_origin("null").is_none());
    }
}
