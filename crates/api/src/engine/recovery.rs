//! Startup sweep for commands left `running` by a previous process.

use cmdexec_core::command::DESC_SERVER_DOWN;
use cmdexec_core::scripting::storage::ScriptStorage;
use cmdexec_core::types::DbId;
use cmdexec_db::repositories::CommandRepo;
use sqlx::PgPool;

/// Mark every `running` command as `error` / "server got down" and delete
/// any script files they left behind.
///
/// Must complete before the executor starts: nothing is running yet, so
/// every `running` row is an orphan. The status change is a single
/// transaction; file removal afterwards is best effort.
pub async fn recover_orphaned_commands(
    pool: &PgPool,
    storage: &ScriptStorage,
) -> Result<Vec<DbId>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let orphans = CommandRepo::fail_all_running(&mut tx, DESC_SERVER_DOWN).await?;
    tx.commit().await?;

    for id in &orphans {
        if let Err(e) = storage.remove(*id).await {
            tracing::warn!(command_id = %id, error = %e, "Failed to delete orphaned script file");
        }
    }

    if orphans.is_empty() {
        tracing::info!("No orphaned commands found");
    } else {
        tracing::warn!(count = orphans.len(), "Marked orphaned commands as failed");
    }

    Ok(orphans)
}
