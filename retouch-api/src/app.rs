/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use retouch_api::{app::AppState, config::Config};
/// use retouch_shared::context::CoreServices;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let (services, _jobs) = CoreServices::in_memory(config.core.clone(), &config.webhook.secret);
/// let state = AppState::new(services, config);
/// let app = retouch_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::config::Config;
use crate::middleware::{identity::require_identity, security};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use retouch_shared::context::CoreServices;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Core components
    pub services: CoreServices,

    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(services: CoreServices, config: Config) -> Self {
        Self {
            services,
            config: Arc::new(config),
        }
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                        # Health check (public)
/// └── /v1/
///     ├── /photos                    # X-User-Id required
///     │   ├── POST /                 # Upload (?mode=)
///     │   ├── GET  /:id              # Status
///     │   ├── POST /:id/enhance      # Start enhancement
///     │   └── POST /:id/retry        # Retry a failed enhancement
///     ├── GET  /account              # X-User-Id required
///     └── POST /webhooks/payments    # Signed by the payment provider
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Security headers
/// 2. CORS (tower-http CorsLayer)
/// 3. Logging (tower-http TraceLayer)
/// 4. Identity (per-route basis)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    // Uploads may be as large as the configured limit
    let upload_limit = usize::try_from(state.config.core.max_upload_bytes).unwrap_or(usize::MAX);

    let user_routes = Router::new()
        .route("/photos", post(routes::photos::upload_photo))
        .route("/photos/:id", get(routes::photos::get_photo))
        .route("/photos/:id/enhance", post(routes::photos::start_enhancement))
        .route("/photos/:id/retry", post(routes::photos::retry_enhancement))
        .route("/account", get(routes::account::get_account))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_identity,
        ));

    let webhook_routes =
        Router::new().route("/webhooks/payments", post(routes::webhooks::payment_webhook));

    let v1_routes = Router::new().merge(user_routes).merge(webhook_routes);

    let cors = cors_layer(&state.config.api.cors_origins);
    let policy = security::SecurityPolicy {
        hsts: state.config.api.production,
    };

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(axum::middleware::from_fn_with_state(
            policy,
            security::security_headers,
        ))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        // Development mode: permissive CORS
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-user-id"),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}
