//! Consumes dispatched command ids and supervises one run per id.
//!
//! Every run gets a child of the executor's root [`CancellationToken`], so
//! cancelling the root stops the consumer loop and every in-flight run.
//! A [`RunGuard`] owned by the run task deletes the script file and drops
//! the registry entry however the run ends, including on panic.

use std::sync::Arc;

use cmdexec_core::error::CoreError;
use cmdexec_core::scripting::sink::CommandSink;
use cmdexec_core::scripting::storage::ScriptStorage;
use cmdexec_core::scripting::supervisor::Supervisor;
use cmdexec_core::types::DbId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::queue::DispatchReceiver;
use super::registry::RunRegistry;

/// Starts runs for dispatched commands and tracks them until they end.
pub struct Executor<S: CommandSink> {
    sink: Arc<S>,
    storage: ScriptStorage,
    supervisor: Supervisor,
    registry: Arc<RunRegistry>,
    root: CancellationToken,
}

impl<S: CommandSink> Executor<S> {
    pub fn new(
        sink: S,
        storage: ScriptStorage,
        supervisor: Supervisor,
        root: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            sink: Arc::new(sink),
            storage,
            supervisor,
            registry: Arc::new(RunRegistry::new()),
            root,
        })
    }

    /// Spawn the consumer loop. It stops when the root token is cancelled
    /// or every [`Dispatcher`](super::Dispatcher) has been dropped.
    pub fn start(self: &Arc<Self>, queue: DispatchReceiver) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.consume(queue).await })
    }

    async fn consume(self: Arc<Self>, mut queue: DispatchReceiver) {
        tracing::info!("Command executor started");

        loop {
            tokio::select! {
                biased;
                () = self.root.cancelled() => {
                    tracing::info!("Command executor shutting down");
                    break;
                }
                next = queue.recv() => match next {
                    Some(id) => self.launch(id),
                    None => {
                        tracing::info!("Dispatch queue closed, command executor stopping");
                        break;
                    }
                },
            }
        }
    }

    /// Register a run for `id` and spawn it.
    ///
    /// A second dispatch of an id that is still tracked is ignored.
    pub fn launch(self: &Arc<Self>, id: DbId) {
        let token = self.root.child_token();
        if !self.registry.insert(id, token.clone()) {
            tracing::warn!(command_id = %id, "Command already running, ignoring dispatch");
            return;
        }

        let guard = RunGuard {
            id,
            registry: Arc::clone(&self.registry),
            storage: self.storage.clone(),
        };
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let _guard = guard;
            let script_path = this.storage.path_for(id);
            tracing::debug!(command_id = %id, path = %script_path.display(), "Run started");
            this.supervisor
                .run(id, &script_path, &token, this.sink.as_ref())
                .await;
        });
    }

    /// Signal cancellation for a tracked run.
    ///
    /// Returns once the signal is sent; the run records `cancelled` on its
    /// own schedule.
    pub fn cancel(&self, id: DbId) -> Result<(), CoreError> {
        if self.registry.cancel(id) {
            tracing::info!(command_id = %id, "Cancellation requested");
            Ok(())
        } else {
            Err(CoreError::NotFound {
                entity: "Running command",
                id,
            })
        }
    }

    pub fn is_running(&self, id: DbId) -> bool {
        self.registry.contains(id)
    }

    pub fn running_count(&self) -> usize {
        self.registry.len()
    }
}

/// Cleanup owned by a run task: script file first, then the registry entry.
struct RunGuard {
    id: DbId,
    registry: Arc<RunRegistry>,
    storage: ScriptStorage,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let id = self.id;
        let registry = Arc::clone(&self.registry);
        self.storage.remove_detached(id, move |removed| {
            if let Err(e) = removed {
                tracing::warn!(command_id = %id, error = %e, "Failed to delete script file");
            }
            registry.remove(id);
            tracing::debug!(command_id = %id, "Run released");
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
