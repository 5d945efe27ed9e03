//! API layer -- axum routes, handlers, and middleware.

mod error;
mod routes;
pub mod state;
pub mod view;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use self::state::AppState;

/// Build the dashboard router: HTML index, health, and the result API.
pub fn router(state: AppState) -> Router {
    let max_log_bytes = state.max_log_bytes;
    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health))
        .nest("/api", routes::api_routes(max_log_bytes))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
