//! HTTP layer: handlers, auth middleware and router assembly.

pub mod auth;
pub mod conversations;
pub mod error;
pub mod links;
pub mod messages;
pub mod middleware;
pub mod pagination;
pub mod storage;
pub mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{MethodRouter, get, post},
};
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use parley_db::Database;

use crate::error::{ApiError, ApiResult};
use crate::middleware::require_auth;
use crate::storage::AttachmentStorage;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub storage: AttachmentStorage,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    /// URL prefix stored attachments are served under, e.g. `/media/`.
    pub media_url: String,
    pub max_upload_bytes: usize,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new();
    let public_routes = route_with_slash(public_routes, "/auth/register", post(auth::register));
    let public_routes = route_with_slash(public_routes, "/auth/login", post(auth::login));
    let public_routes = public_routes
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new();
    let protected_routes = route_with_slash(protected_routes, "/auth/logout", post(auth::logout));
    let protected_routes = route_with_slash(protected_routes, "/users", get(users::list_users));
    let protected_routes = route_with_slash(
        protected_routes,
        "/conversations",
        get(conversations::list_conversations).post(conversations::create_conversation),
    );
    let protected_routes = route_with_slash(
        protected_routes,
        "/messages/{conversation_id}",
        get(messages::list_messages),
    );
    let protected_routes = route_with_slash(protected_routes, "/messages/send", post(messages::send_message));
    let protected_routes = protected_routes
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let media_prefix = state.media_url.trim_end_matches('/');
    let media_routes = Router::new().nest_service(media_prefix, ServeDir::new(state.storage.root()));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(media_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn route_with_slash(router: Router<AppState>, path: &str, method_router: MethodRouter<AppState>) -> Router<AppState> {
    router
        .route(path, method_router.clone())
        .route(&format!("{path}/"), method_router)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run a store call off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
        })?
        .map_err(ApiError::from)
}

/// Parse a stored timestamp, logging and defaulting on corrupt values.
pub(crate) fn parse_timestamp(raw: &str, context: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on {}: {}", raw, context, e);
            DateTime::default()
        })
}
