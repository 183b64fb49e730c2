//! HTTP API of the collector server.

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use metrix_core::Repository;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod handlers;
pub mod middleware;


/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    /// Signing key; requests are verified and responses signed only when set.
    pub key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, key: Option<&str>) -> Self {
        Self { repo, key: key.map(Arc::from) }
    }
}

/// Build the router with every route and middleware wired.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::list_all))
        .route("/ping", get(handlers::ping))
        .route("/update/:kind/:name/:value", post(handlers::update_by_path))
        .route("/update", post(handlers::update_json))
        .route("/update/", post(handlers::update_json))
        .route("/updates", post(handlers::update_batch))
        .route("/updates/", post(handlers::update_batch))
        .route("/value/:kind/:name", get(handlers::value_by_path))
        .route("/value", post(handlers::value_json))
        .route("/value/", post(handlers::value_json))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::frame_body))
        .layer(axum_middleware::from_fn(middleware::record_request))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
