//! Shared utilities for pipeline and server tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use movies_api::config::AppConfig;
use movies_api::http::{Collaborators, HttpServer};
use movies_api::lifecycle::{ShutdownCoordinator, ShutdownError};
use movies_api::mailer::{MailError, Mailer, WelcomeMail};
use movies_api::store::{
    MemoryStore, Movie, MovieQuery, MovieStore, NewUser, PermissionStore, StoreError, TokenIssuer, TokenScope,
    User, UserStore,
};

pub const ALLOWED_ORIGIN: &str = "https://allowed.example";

/// Defaults with a trusted origin and a generous limiter.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.cors.trusted_origins = vec![ALLOWED_ORIGIN.to_string()];
    config.limiter.requests_per_second = 1000.0;
    config.limiter.burst_size = 1000;
    config.shutdown.grace_period_secs = 5;
    config
}

/// Mailer that counts deliveries and can hold them until released.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: AtomicUsize,
    pub gate: Option<Arc<Notify>>,
}

impl RecordingMailer {
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            sent: AtomicUsize::new(0),
            gate: Some(gate),
        }
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_welcome(&self, _recipient: &str, _mail: &WelcomeMail) -> Result<(), MailError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Movie store whose reads panic, for exercising panic recovery.
pub struct PanickingMovies;

#[async_trait]
impl MovieStore for PanickingMovies {
    async fn insert(&self, _: String, _: i32, _: i32, _: Vec<String>) -> Result<Movie, StoreError> {
        Err(StoreError::Backend("read-only".into()))
    }

    async fn get(&self, id: i64) -> Result<Movie, StoreError> {
        panic!("movie {id} row is corrupt");
    }

    async fn update(&self, _: Movie) -> Result<Movie, StoreError> {
        Err(StoreError::Backend("read-only".into()))
    }

    async fn delete(&self, _: i64) -> Result<(), StoreError> {
        Err(StoreError::Backend("read-only".into()))
    }

    async fn list(&self, _: &MovieQuery) -> Result<(Vec<Movie>, usize), StoreError> {
        Ok((Vec::new(), 0))
    }
}

pub fn collaborators(store: &MemoryStore, mailer: Arc<RecordingMailer>) -> Collaborators {
    Collaborators::in_memory(store, mailer)
}

/// Register a user holding `codes`, returning it with an authentication token.
pub async fn user_with_token(store: &MemoryStore, email: &str, activated: bool, codes: &[&str]) -> (User, String) {
    let user = UserStore::insert(
        store,
        NewUser {
            name: "Test User".to_string(),
            email: email.to_string(),
        },
    )
    .await
    .unwrap();
    if activated {
        store.activate(user.id).unwrap();
    }
    store.add_for_user(user.id, codes).await.unwrap();
    let token = store
        .issue(user.id, TokenScope::Authentication, Duration::from_secs(3600))
        .await
        .unwrap();
    (user, token)
}

/// Request builder carrying a peer address, as the real listener provides.
pub fn request(method: Method, uri: &str, peer: &str) -> axum::http::request::Builder {
    let addr: SocketAddr = peer.parse().unwrap();
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(addr))
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri, "10.0.0.1:40000").body(Body::empty()).unwrap()
}

pub fn authorized(method: Method, uri: &str, token: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = request(method, uri, "10.0.0.1:40000").header("authorization", format!("Bearer {token}"));
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub struct RunningServer {
    pub addr: SocketAddr,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub handle: JoinHandle<Result<(), ShutdownError>>,
}

/// Bind an ephemeral port and serve until the coordinator is triggered.
pub async fn start_server(config: AppConfig, collaborators: Collaborators) -> RunningServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config, collaborators);
    let coordinator = server.coordinator();
    let handle = tokio::spawn(server.run(listener));
    RunningServer {
        addr,
        coordinator,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
