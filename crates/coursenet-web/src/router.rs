//! Web router using Axum

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Create the gateway router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/nav", get(handlers::nav))
        .route("/epfl", get(handlers::epfl_root))
        .route("/epfl/", get(handlers::epfl_root))
        .route("/epfl/{level}", get(handlers::epfl_node))
        .route("/epfl/{level}/{program}", get(handlers::epfl_node))
        .route(
            "/epfl/{level}/{program}/{specialization}",
            get(handlers::epfl_node),
        )
        .route("/course/search", get(handlers::search))
        .route("/course/{slug}", get(handlers::course))
        .route("/simlinks", post(handlers::simlinks))
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::not_found)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
