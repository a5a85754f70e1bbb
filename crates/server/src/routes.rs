//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the application router: a status page, an unauthenticated health
/// endpoint, and the admission pipeline for everything else.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::status_page))
        .route("/health", get(handlers::health))
        .fallback(handlers::proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
