//! The store seam used by the supervisor.
//!
//! [`CommandSink`] is the only way a run touches persistent state: one
//! call per output chunk, then exactly one terminal write. The API crate
//! backs it with PostgreSQL; tests use [`memory::MemorySink`].

use std::future::Future;

use crate::command::Termination;
use crate::types::DbId;

/// Persistent side of a command run.
///
/// Implementations must treat each call as its own unit of work and must
/// ignore writes for commands that already reached a terminal state.
pub trait CommandSink: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append a non-empty output chunk to the command.
    fn append_output(
        &self,
        id: DbId,
        chunk: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Record a normal termination (`finished`).
    fn finish(
        &self,
        id: DbId,
        termination: Termination,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Record an abnormal termination (`error`) with a description.
    fn fail(
        &self,
        id: DbId,
        description: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    //! In-memory [`CommandSink`] for tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    use super::CommandSink;
    use crate::command::Termination;
    use crate::types::DbId;

    /// Terminal state recorded for a command.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Terminal {
        Finished(Termination),
        Error(String),
    }

    /// Everything the sink has seen for one command.
    #[derive(Debug, Clone, Default)]
    pub struct RecordedCommand {
        /// Concatenated output.
        pub output: String,
        /// Every append, in order.
        pub appends: Vec<String>,
        /// First terminal write; later ones are ignored like the real store.
        pub terminal: Option<Terminal>,
        /// Number of terminal writes attempted.
        pub terminal_writes: usize,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("memory sink rejected write for command {0}")]
    pub struct MemorySinkError(pub DbId);

    /// Records writes per command id; can be told to reject writes.
    #[derive(Debug, Default)]
    pub struct MemorySink {
        records: Mutex<HashMap<DbId, RecordedCommand>>,
        reject_appends: AtomicBool,
        reject_terminal: AtomicBool,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent append fail.
        pub fn reject_appends(&self) {
            self.reject_appends.store(true, Ordering::SeqCst);
        }

        /// Make every subsequent terminal write fail.
        pub fn reject_terminal_writes(&self) {
            self.reject_terminal.store(true, Ordering::SeqCst);
        }

        /// Snapshot of what has been recorded for `id`.
        pub fn record(&self, id: DbId) -> Option<RecordedCommand> {
            self.lock().get(&id).cloned()
        }

        pub fn terminal(&self, id: DbId) -> Option<Terminal> {
            self.record(id).and_then(|r| r.terminal)
        }

        /// Poll until `id` has a terminal state or `timeout` elapses.
        pub async fn wait_for_terminal(&self, id: DbId, timeout: Duration) -> Option<Terminal> {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                if let Some(terminal) = self.terminal(id) {
                    return Some(terminal);
                }
                if tokio::time::Instant::now() >= deadline {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DbId, RecordedCommand>> {
            self.records.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn write_terminal(&self, id: DbId, terminal: Terminal) -> Result<(), MemorySinkError> {
            let mut records = self.lock();
            let record = records.entry(id).or_default();
            record.terminal_writes += 1;
            if self.reject_terminal.load(Ordering::SeqCst) {
                return Err(MemorySinkError(id));
            }
            if record.terminal.is_none() {
                record.terminal = Some(terminal);
            }
            Ok(())
        }
    }

    impl CommandSink for MemorySink {
        type Error = MemorySinkError;

        async fn append_output(&self, id: DbId, chunk: &str) -> Result<(), Self::Error> {
            if self.reject_appends.load(Ordering::SeqCst) {
                return Err(MemorySinkError(id));
            }
            let mut records = self.lock();
            let record = records.entry(id).or_default();
            if record.terminal.is_none() {
                record.output.push_str(chunk);
                record.appends.push(chunk.to_string());
            }
            Ok(())
        }

        async fn finish(&self, id: DbId, termination: Termination) -> Result<(), Self::Error> {
            self.write_terminal(id, Terminal::Finished(termination))
        }

        async fn fail(&self, id: DbId, description: &str) -> Result<(), Self::Error> {
            self.write_terminal(id, Terminal::Error(description.to_string()))
        }
    }
}
