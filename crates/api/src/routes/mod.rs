pub mod commands;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ping                        liveness probe
///
/// /commands                    list (GET), submit (POST, text/plain)
/// /commands/{id}               full command incl. source and output
/// /commands/{id}/cancel        request cancellation (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::ping_router())
        .nest("/commands", commands::router())
}
