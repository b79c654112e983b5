use std::sync::Arc;

use cmdexec_core::scripting::storage::ScriptStorage;

use crate::config::ServerConfig;
use crate::engine::{CommandExecutor, Dispatcher};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: inner data is behind `Arc` or is already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: cmdexec_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Where intake writes script files.
    pub storage: ScriptStorage,
    /// Sending side of the dispatch queue.
    pub dispatcher: Dispatcher,
    /// Run registry and cancellation entry point.
    pub executor: Arc<CommandExecutor>,
}
