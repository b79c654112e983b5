//! Handlers for the `/commands` resource.
//!
//! Submission persists the command and its script file in one transaction
//! and only then hands the id to the executor, so every dispatched id has
//! a committed row and a file on disk.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use cmdexec_core::command::DESC_DISPATCH_FAILED;
use cmdexec_core::error::CoreError;
use cmdexec_core::scripting::shebang::validate_script;
use cmdexec_core::scripting::storage::ScriptStorage;
use cmdexec_core::types::DbId;
use cmdexec_db::repositories::CommandRepo;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of a successful submission.
#[derive(Debug, Serialize)]
pub struct SubmittedCommand {
    pub id: DbId,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Accept `text/plain`, with or without parameters such as `charset`.
fn ensure_plain_text(headers: &HeaderMap) -> AppResult<()> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let essence = content_type.split(';').next().unwrap_or_default().trim();

    if essence.eq_ignore_ascii_case("text/plain") {
        Ok(())
    } else {
        Err(AppError::UnsupportedMediaType(format!(
            "Expected Content-Type text/plain, got '{content_type}'"
        )))
    }
}

/// Decode and validate a submitted script body.
fn parse_script(body: &[u8]) -> AppResult<String> {
    let source = std::str::from_utf8(body)
        .map_err(|_| AppError::BadRequest("Script must be valid UTF-8".to_string()))?;
    if source.contains('\0') {
        return Err(AppError::BadRequest(
            "Script must not contain NUL characters".to_string(),
        ));
    }
    validate_script(source)?;
    Ok(source.to_string())
}

fn parse_command_id(raw: &str) -> AppResult<DbId> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid command id '{raw}'")))
}

/// Script file written during submission.
///
/// Error paths call [`discard`](Self::discard); if the submit future is
/// dropped instead, `Drop` removes the file off the async workers.
struct PendingScript<'a> {
    storage: &'a ScriptStorage,
    id: DbId,
    armed: bool,
}

impl PendingScript<'_> {
    fn keep(mut self) {
        self.armed = false;
    }

    async fn discard(mut self) {
        self.armed = false;
        if let Err(e) = self.storage.remove(self.id).await {
            tracing::warn!(command_id = %self.id, error = %e, "Failed to delete uncommitted script file");
        }
    }
}

impl Drop for PendingScript<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.id;
        self.storage.remove_detached(id, move |removed| {
            if let Err(e) = removed {
                tracing::warn!(command_id = %id, error = %e, "Failed to delete uncommitted script file");
            }
        });
    }
}

/// Insert the command, write its script file and commit.
///
/// If any step fails, or the future is dropped by the submit timeout, the
/// transaction rolls back and the file is removed.
async fn persist_command(state: &AppState, source: &str) -> AppResult<DbId> {
    let mut tx = state.pool.begin().await?;
    let id = CommandRepo::insert(&mut tx, source).await?;

    let script = PendingScript {
        storage: &state.storage,
        id,
        armed: true,
    };
    if let Err(e) = state.storage.write(id, source).await {
        script.discard().await;
        return Err(AppError::InternalError(e.to_string()));
    }

    if let Err(e) = tx.commit().await {
        script.discard().await;
        return Err(e.into());
    }
    script.keep();

    Ok(id)
}

/// Finalize a command whose id could not be handed to the executor.
async fn abandon_undispatched(state: &AppState, id: DbId) {
    let result = async {
        let mut conn = state.pool.acquire().await?;
        CommandRepo::fail(&mut conn, id, DESC_DISPATCH_FAILED).await
    }
    .await;
    if let Err(e) = result {
        tracing::error!(command_id = %id, error = %e, "Failed to mark undispatched command");
    }
    if let Err(e) = state.storage.remove(id).await {
        tracing::warn!(command_id = %id, error = %e, "Failed to delete undispatched script file");
    }
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/commands
///
/// Body is the raw script (`text/plain`). Returns 201 with the new id
/// once the command is committed and queued.
pub async fn submit_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    ensure_plain_text(&headers)?;
    let source = parse_script(&body)?;

    let deadline = Duration::from_secs(state.config.submit_timeout_secs);
    let id = tokio::time::timeout(deadline, persist_command(&state, &source))
        .await
        .map_err(|_| AppError::InternalError("Timed out saving command".to_string()))??;

    if let Err(e) = state.dispatcher.dispatch(id).await {
        abandon_undispatched(&state, id).await;
        return Err(AppError::InternalError(e.to_string()));
    }

    tracing::info!(command_id = %id, bytes = source.len(), "Command submitted");

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: SubmittedCommand { id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/commands
///
/// All commands in submission order, without source or output.
pub async fn list_commands(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let commands = CommandRepo::list_summaries(&state.pool).await?;
    Ok(Json(DataResponse { data: commands }))
}

/// GET /api/v1/commands/{id}
pub async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_command_id(&id)?;
    let command = CommandRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Command",
            id,
        }))?;
    Ok(Json(DataResponse { data: command }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/commands/{id}/cancel
///
/// Returns 202 once cancellation is signalled; the command reaches
/// `error` / "cancelled" asynchronously. 404 if no run is in flight.
pub async fn cancel_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_command_id(&id)?;
    state.executor.cancel(id)?;
    Ok(StatusCode::ACCEPTED)
}
