//! API module
//!
//! Read-only dashboard façade over the published aggregate relation.

pub mod middleware;
pub mod routes;

use axum::{middleware as axum_middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use routes::{create_router, AppState};

/// Full application router: dashboard routes, health check, CORS and tracing
pub fn build_router(state: AppState) -> Router {
    // Layers run outside-in: trace -> cors -> logging -> handler
    let dashboard = create_router().layer(axum_middleware::from_fn(middleware::logging_middleware));

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(dashboard)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
