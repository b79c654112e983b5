#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use cmdexec_core::scripting::storage::ScriptStorage;
use cmdexec_core::scripting::supervisor::Supervisor;
use cmdexec_core::types::DbId;
use cmdexec_db::models::command::Command;
use cmdexec_db::repositories::CommandRepo;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use cmdexec_api::config::ServerConfig;
use cmdexec_api::engine::{dispatch_queue, CommandExecutor, DispatchReceiver, Executor, PgCommandSink};
use cmdexec_api::router::build_app_router;
use cmdexec_api::state::AppState;

/// Interpreter used by tests; `/bin/sh` exists on every Unix host.
pub const TEST_INTERPRETER: &str = "/bin/sh";

/// Build a test `ServerConfig` with safe defaults and the given script dir.
pub fn test_config(script_dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        submit_timeout_secs: 10,
        script_dir: script_dir.to_path_buf(),
        shell_interpreter: TEST_INTERPRETER.into(),
        dispatch_queue_capacity: 16,
    }
}

/// A fully wired application over a temporary script directory.
///
/// Cancels the executor's root token when dropped.
pub struct TestApp {
    pub router: Router,
    pub pool: PgPool,
    pub storage: ScriptStorage,
    pub executor: Arc<CommandExecutor>,
    pub shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn assemble(pool: PgPool) -> (TestApp, DispatchReceiver) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir.path().join("commands"));
    let storage = ScriptStorage::prepare(&config.script_dir).await.unwrap();

    let shutdown = CancellationToken::new();
    let (dispatcher, queue) = dispatch_queue(config.dispatch_queue_capacity);
    let executor = Executor::new(
        PgCommandSink::new(pool.clone()),
        storage.clone(),
        Supervisor::new(TEST_INTERPRETER),
        shutdown.clone(),
    );

    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        storage: storage.clone(),
        dispatcher,
        executor: Arc::clone(&executor),
    };

    let app = TestApp {
        router: build_app_router(state, &config),
        pool,
        storage,
        executor,
        shutdown,
        _dir: dir,
    };
    (app, queue)
}

/// Build the application with the executor consuming the dispatch queue,
/// as in production.
pub async fn build_test_app(pool: PgPool) -> TestApp {
    let (app, queue) = assemble(pool).await;
    app.executor.start(queue);
    app
}

/// Build the application without starting the executor.
///
/// Submitted ids pile up in the returned receiver, so nothing runs and the
/// script files stay in place.
pub async fn build_parked_app(pool: PgPool) -> (TestApp, DispatchReceiver) {
    assemble(pool).await
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &TestApp, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post_with_type(app: &TestApp, uri: &str, content_type: &str, body: &[u8]) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body.to_vec()))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post_text(app: &TestApp, uri: &str, body: &str) -> Response {
    post_with_type(app, uri, "text/plain", body.as_bytes()).await
}

pub async fn post_empty(app: &TestApp, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Submit a script and return its id, asserting 201.
pub async fn submit(app: &TestApp, script: &str) -> DbId {
    let response = post_text(app, "/api/v1/commands", script).await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    let json = body_json(response).await;
    json["data"]["id"].as_str().unwrap().parse().unwrap()
}

// ---------------------------------------------------------------------------
// Polling helpers
// ---------------------------------------------------------------------------

/// Poll until the command leaves `running`, or panic after `timeout`.
pub async fn wait_for_terminal(pool: &PgPool, id: DbId, timeout: Duration) -> Command {
    tokio::time::timeout(timeout, async {
        loop {
            let command = CommandRepo::find_by_id(pool, id).await.unwrap().unwrap();
            if command.status != "running" {
                return command;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("command should reach a terminal state")
}

/// Poll until the command has produced some output.
pub async fn wait_for_output(pool: &PgPool, id: DbId, timeout: Duration) -> Command {
    tokio::time::timeout(timeout, async {
        loop {
            let command = CommandRepo::find_by_id(pool, id).await.unwrap().unwrap();
            if !command.output.is_empty() {
                return command;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("command should produce output")
}

pub async fn count_commands(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM commands")
        .fetch_one(pool)
        .await
        .unwrap()
}
