//! HTTP transport shell.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::app_state::AppState;

/// Assemble the service router. Health routes stay outside the auth gate.
pub fn build_router(state: AppState) -> Router {
    let scrape_routes = Router::new()
        .route("/v1/scrape", post(handlers::scrape))
        .route(
            "/v1/scrape/:job_id",
            get(handlers::job_status).delete(handlers::delete_job),
        )
        .route("/scrape", post(handlers::legacy_scrape_redirect))
        .route(
            "/scrape/:job_id",
            get(handlers::job_status).delete(handlers::delete_job),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/", get(handlers::health))
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::health))
        .merge(scrape_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
