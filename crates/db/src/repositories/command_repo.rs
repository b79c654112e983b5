//! Repository for the `commands` table.
//!
//! Every mutation after insert is guarded by `status_id = running`, so a
//! command in a terminal state is never modified again. Guarded mutations
//! return `false` when no running row matched.

use cmdexec_core::command::Termination;
use cmdexec_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::command::{Command, CommandSummary};
use crate::models::status::CommandStatus;

/// Column list for full command queries, including joined status name.
const COLUMNS: &str = "\
    c.id, c.source, cs.name AS status, c.status_desc, c.output, \
    c.exit_code, c.signal, c.created_at, c.updated_at";

/// Column list for the shortened list projection.
const SUMMARY_COLUMNS: &str = "\
    c.id, cs.name AS status, c.status_desc, c.exit_code, c.signal, c.created_at";

/// Join clause used in all read queries to include the status name.
const JOIN: &str = "\
    commands c \
    JOIN command_statuses cs ON c.status_id = cs.id";

/// Provides query operations for command records.
pub struct CommandRepo;

impl CommandRepo {
    /// Insert a new command in status `running` and return its id.
    pub async fn insert(conn: &mut PgConnection, source: &str) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar("INSERT INTO commands (source, status_id) VALUES ($1, $2) RETURNING id")
            .bind(source)
            .bind(CommandStatus::Running.id())
            .fetch_one(conn)
            .await
    }

    /// Append a chunk to the output of a running command.
    ///
    /// NUL characters are dropped because PostgreSQL `TEXT` cannot store them.
    pub async fn append_output(
        conn: &mut PgConnection,
        id: DbId,
        chunk: &str,
    ) -> Result<bool, sqlx::Error> {
        let chunk = chunk.replace('\0', "");
        let result = sqlx::query(
            "UPDATE commands \
             SET output = output || $2, updated_at = now() \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(chunk)
        .bind(CommandStatus::Running.id())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition a running command to `finished`, recording either its
    /// exit code or its terminating signal.
    pub async fn finish(
        conn: &mut PgConnection,
        id: DbId,
        termination: Termination,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE commands \
             SET status_id = $2, exit_code = $3, signal = $4, updated_at = now() \
             WHERE id = $1 AND status_id = $5",
        )
        .bind(id)
        .bind(CommandStatus::Finished.id())
        .bind(termination.exit_code())
        .bind(termination.signal())
        .bind(CommandStatus::Running.id())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition a running command to `error` with a description.
    pub async fn fail(
        conn: &mut PgConnection,
        id: DbId,
        description: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE commands \
             SET status_id = $2, status_desc = $3, updated_at = now() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(CommandStatus::Error.id())
        .bind(description)
        .bind(CommandStatus::Running.id())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move every running command to `error` and return their ids.
    ///
    /// Used by crash recovery before the executor starts.
    pub async fn fail_all_running(
        conn: &mut PgConnection,
        description: &str,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE commands \
             SET status_id = $1, status_desc = $2, updated_at = now() \
             WHERE status_id = $3 \
             RETURNING id",
        )
        .bind(CommandStatus::Error.id())
        .bind(description)
        .bind(CommandStatus::Running.id())
        .fetch_all(conn)
        .await
    }

    /// Find a command by id with its full projection.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Command>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {JOIN} WHERE c.id = $1");
        sqlx::query_as::<_, Command>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List all commands in submission order, shortened projection.
    pub async fn list_summaries(pool: &PgPool) -> Result<Vec<CommandSummary>, sqlx::Error> {
        let query = format!("SELECT {SUMMARY_COLUMNS} FROM {JOIN} ORDER BY c.created_at, c.id");
        sqlx::query_as::<_, CommandSummary>(&query)
            .fetch_all(pool)
            .await
    }
}
