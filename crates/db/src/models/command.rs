//! Command entity models.

use cmdexec_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Full projection of a command, including source and captured output.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Command {
    pub id: DbId,
    pub source: String,
    /// Joined from `command_statuses.name`.
    pub status: String,
    /// Set only when `status` is `error`.
    pub status_desc: Option<String>,
    pub output: String,
    /// Set only on normal exit.
    pub exit_code: Option<i32>,
    /// Set only on signal termination.
    pub signal: Option<i32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Shortened projection used by the list endpoint (no source, no output).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommandSummary {
    pub id: DbId,
    pub status: String,
    pub status_desc: Option<String>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub created_at: Timestamp,
}
