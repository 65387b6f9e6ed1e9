//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build every pipeline component from configuration
//! - Create the Axum Router with handlers and per-route permissions
//! - Wire up middleware in pipeline order
//! - Serve on a listener under the shutdown coordinator

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post, put, MethodRouter},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::http::handlers::{self, MOVIES_READ, MOVIES_WRITE};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::{BackgroundTasks, ShutdownCoordinator, ShutdownError};
use crate::mailer::{LogMailer, Mailer};
use crate::observability::metrics::{metrics_middleware, MetricsCollector};
use crate::resilience::PanicRecoverer;
use crate::security::{
    authenticate_middleware, cors_middleware, rate_limit_middleware, require_permission, CorsNegotiator,
    PermissionAuthorizer, RateLimiterRegistry, RequiredPermission, TokenAuthenticator,
};
use crate::store::{MemoryStore, MovieStore, PermissionStore, TokenIssuer, UserStore};

/// External collaborators the service is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub movies: Arc<dyn MovieStore>,
    pub mailer: Arc<dyn Mailer>,
}

impl Collaborators {
    /// Every store backed by one in-memory store.
    pub fn in_memory(store: &MemoryStore, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            users: Arc::new(store.clone()),
            permissions: Arc::new(store.clone()),
            tokens: Arc::new(store.clone()),
            movies: Arc::new(store.clone()),
            mailer,
        }
    }

    /// In-memory stores and a logging mailer.
    pub fn in_memory_with_log_mailer(store: &MemoryStore, sender: &str) -> Self {
        Self::in_memory(store, Arc::new(LogMailer::new(sender)))
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub env: String,
    pub users: Arc<dyn UserStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub movies: Arc<dyn MovieStore>,
    pub mailer: Arc<dyn Mailer>,
    pub tasks: BackgroundTasks,
    pub metrics: Arc<MetricsCollector>,
    pub limiter: Arc<RateLimiterRegistry>,
    pub panics: PanicRecoverer,
    pub lookup_timeout: Duration,
}

/// HTTP server for the API.
pub struct HttpServer {
    config: AppConfig,
    state: AppState,
    authenticator: Arc<TokenAuthenticator>,
    authorizer: Arc<PermissionAuthorizer>,
    cors: Arc<CorsNegotiator>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        let lookup_timeout = Duration::from_millis(config.auth.lookup_timeout_ms);
        let tasks = BackgroundTasks::new();

        let coordinator = Arc::new(
            ShutdownCoordinator::new(tasks.clone(), Duration::from_secs(config.shutdown.grace_period_secs))
                .with_background_deadline(config.shutdown.background_deadline_secs.map(Duration::from_secs)),
        );

        let authenticator = Arc::new(TokenAuthenticator::new(collaborators.users.clone(), lookup_timeout));
        let authorizer = Arc::new(PermissionAuthorizer::new(
            collaborators.permissions.clone(),
            lookup_timeout,
        ));
        let cors = Arc::new(CorsNegotiator::new(config.cors.trusted_origins.clone()));

        let state = AppState {
            env: config.env.clone(),
            users: collaborators.users,
            permissions: collaborators.permissions,
            tokens: collaborators.tokens,
            movies: collaborators.movies,
            mailer: collaborators.mailer,
            tasks,
            metrics: Arc::new(MetricsCollector::new()),
            limiter: Arc::new(RateLimiterRegistry::new(&config.limiter)),
            panics: PanicRecoverer::new(),
            lookup_timeout,
        };

        Self {
            config,
            state,
            authenticator,
            authorizer,
            cors,
            coordinator,
        }
    }

    fn permission(&self, code: &'static str) -> RequiredPermission {
        RequiredPermission::new(self.authorizer.clone(), code)
    }

    fn protected(&self, code: &'static str, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
        route.route_layer(middleware::from_fn_with_state(self.permission(code), require_permission))
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers run outermost first: panic recovery, request id, trace,
    /// metrics, CORS, rate limit, authentication, timeout, then the route's
    /// permission check and handler.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let movies = self
            .protected(MOVIES_READ, get(handlers::list_movies))
            .merge(self.protected(MOVIES_WRITE, post(handlers::create_movie)));

        let movie = self
            .protected(MOVIES_READ, get(handlers::show_movie))
            .merge(self.protected(
                MOVIES_WRITE,
                put(handlers::update_movie)
                    .patch(handlers::update_movie)
                    .delete(handlers::delete_movie),
            ));

        Router::new()
            .route("/v1/healthcheck", get(handlers::healthcheck))
            .route("/v1/movies", movies)
            .route("/v1/movies/{id}", movie)
            .route("/v1/users", post(handlers::register_user))
            .route("/debug/vars", get(handlers::debug_vars))
            .fallback(handlers::not_found)
            .method_not_allowed_fallback(handlers::method_not_allowed)
            .with_state(self.state.clone())
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(middleware::from_fn_with_state(
                self.authenticator.clone(),
                authenticate_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                self.state.limiter.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(self.cors.clone(), cors_middleware))
            .layer(middleware::from_fn_with_state(
                self.state.metrics.clone(),
                metrics_middleware,
            ))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
            .layer(self.state.panics.layer())
    }

    /// Handler state, shared with every request.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The coordinator this server shuts down under.
    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        self.coordinator.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run the server until shutdown completes.
    ///
    /// Returns once the listener has closed and every background task has
    /// finished (or the background deadline passed).
    pub async fn run(self, listener: TcpListener) -> Result<(), ShutdownError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            env = %self.config.env,
            "HTTP server starting"
        );

        let sweeper = self
            .state
            .limiter
            .is_enabled()
            .then(|| self.state.limiter.spawn_sweeper(self.coordinator.subscribe()));

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        let signal = self.coordinator.clone();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.triggered().await })
            .into_future();

        let outcome = self.coordinator.supervise(server).await;

        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "Rate limiter sweeper ended abnormally");
            }
        }

        match &outcome {
            Ok(()) => tracing::info!("HTTP server stopped"),
            Err(e) => tracing::error!(error = %e, "HTTP server stopped with error"),
        }
        outcome
    }
}
