use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{delete, get, patch, post, put},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::services::{AuditLog, SessionManager};
use crate::state::SharedState;
use crate::store::{InviteStore, UserStore};
use crate::tariff::TableProvider;

pub mod auth;
pub mod calc;
pub mod csrf;
mod error;
pub mod invites;
pub mod observability;
pub mod system;
pub mod tables;
mod types;
pub mod users;

pub use csrf::CsrfGuard;
pub use error::ApiError;
pub use types::{ApiResponse, MessageResponse};

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn users(&self) -> &Arc<UserStore> {
        &self.shared.users
    }

    #[must_use]
    pub fn invites(&self) -> &Arc<InviteStore> {
        &self.shared.invites
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.shared.sessions
    }

    #[must_use]
    pub fn csrf(&self) -> &Arc<CsrfGuard> {
        &self.shared.csrf
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.shared.audit
    }

    #[must_use]
    pub fn tables(&self) -> &Arc<dyn TableProvider> {
        &self.shared.tables
    }
}

pub async fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    Ok(Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    }))
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    create_app_state(shared, prometheus_handle).await
}

pub async fn router(state: Arc<AppState>) -> Router {
    let cors_origins = {
        let config = state.config().read().await;
        config.server.cors_allowed_origins.clone()
    };

    let admin_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users", post(users::create_user))
        .route("/users/{id}", patch(users::patch_user))
        .route("/users/{id}", delete(users::delete_user))
        .route("/users/{id}/password", put(users::reset_password))
        .route("/invites", get(invites::list_invites))
        .route("/invites", post(invites::create_invite))
        .route("/invites/{code}", delete(invites::delete_invite))
        .route_layer(middleware::from_fn(auth::require_admin));

    let protected_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/change-password", post(auth::change_password))
        .route("/me", get(auth::me))
        .route("/tables", get(tables::list_tables))
        .route("/tables/{key}", get(tables::get_table))
        .route("/calc", post(calc::calc))
        .route("/metrics", get(observability::get_metrics))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    // CSRF is layered outside authentication: a mutating request without a
    // valid token dies before any handler or business validation runs.
    let api_router = Router::new()
        .merge(protected_routes)
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route("/csrf-token", get(csrf::issue_csrf_token))
        .route("/health", get(system::health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            csrf::csrf_middleware,
        ))
        .with_state(state);

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::track_requests))
        .layer(middleware::from_fn(observability::security_headers))
}
