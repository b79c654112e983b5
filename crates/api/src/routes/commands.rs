use axum::routing::{get, post};
use axum::Router;

use crate::handlers::commands;
use crate::state::AppState;

/// Routes mounted at `/api/v1/commands`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(commands::list_commands).post(commands::submit_command),
        )
        .route("/{id}", get(commands::get_command))
        .route("/{id}/cancel", post(commands::cancel_command))
}
