//! Status server -- axum routes exposing process state to the supervisor.

mod routes;
pub mod state;
pub mod watchdog;

use self::state::AppState;
use axum::Router;
use tower_http::trace::TraceLayer;

pub use self::routes::render;

/// Build the application router with all status routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::status_routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
