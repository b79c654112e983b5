use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cmdexec_core::scripting::storage::ScriptStorage;
use cmdexec_core::scripting::supervisor::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cmdexec_api::config::ServerConfig;
use cmdexec_api::engine::{self, Executor, PgCommandSink};
use cmdexec_api::router::build_app_router;
use cmdexec_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cmdexec_api=debug,cmdexec_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        script_dir = %config.script_dir.display(),
        interpreter = %config.shell_interpreter.display(),
        "Loaded server configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = cmdexec_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    cmdexec_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    cmdexec_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Script storage ---
    let storage = ScriptStorage::prepare(&config.script_dir)
        .await
        .expect("Failed to prepare script directory");

    // --- Crash recovery (before anything can run) ---
    engine::recovery::recover_orphaned_commands(&pool, &storage)
        .await
        .expect("Failed to recover orphaned commands");

    // --- Executor ---
    let shutdown = CancellationToken::new();
    let (dispatcher, queue) = engine::dispatch_queue(config.dispatch_queue_capacity);
    let executor = Executor::new(
        PgCommandSink::new(pool.clone()),
        storage.clone(),
        Supervisor::new(&config.shell_interpreter),
        shutdown.clone(),
    );
    let executor_handle = executor.start(queue);

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        storage,
        dispatcher,
        executor: Arc::clone(&executor),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!(
        running = executor.running_count(),
        "Server stopped accepting connections, stopping executor",
    );

    // Runs that have not recorded a terminal state by exit are swept by
    // crash recovery on the next start.
    shutdown.cancel();
    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(timeout, executor_handle).await.is_err() {
        tracing::warn!("Command executor did not stop in time");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
