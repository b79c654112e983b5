//! PostgreSQL-backed [`CommandSink`].
//!
//! Each write is its own short transaction. A write that matches no
//! running row means the command already reached a terminal state; that
//! is logged and treated as success.

use cmdexec_core::command::Termination;
use cmdexec_core::scripting::sink::CommandSink;
use cmdexec_core::types::DbId;
use cmdexec_db::repositories::CommandRepo;
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct PgCommandSink {
    pool: PgPool,
}

impl PgCommandSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CommandSink for PgCommandSink {
    type Error = sqlx::Error;

    async fn append_output(&self, id: DbId, chunk: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let appended = CommandRepo::append_output(&mut tx, id, chunk).await?;
        tx.commit().await?;

        if !appended {
            tracing::warn!(command_id = %id, "Output dropped, command is no longer running");
        }
        Ok(())
    }

    async fn finish(&self, id: DbId, termination: Termination) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let updated = CommandRepo::finish(&mut tx, id, termination).await?;
        tx.commit().await?;

        if !updated {
            tracing::warn!(command_id = %id, ?termination, "Finish ignored, command is no longer running");
        }
        Ok(())
    }

    async fn fail(&self, id: DbId, description: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let updated = CommandRepo::fail(&mut tx, id, description).await?;
        tx.commit().await?;

        if !updated {
            tracing::warn!(command_id = %id, description, "Failure ignored, command is no longer running");
        }
        Ok(())
    }
}
