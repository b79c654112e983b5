use std::path::PathBuf;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development except the
/// database URL, which `main` reads separately.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8081`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long to wait for the dispatch consumer to stop after the server
    /// stops accepting connections (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// Upper bound on the submit transaction: insert, script write, commit
    /// (default: `20`). Always shorter than `request_timeout_secs`.
    pub submit_timeout_secs: u64,
    /// Directory holding one script file per running command
    /// (default: `/tmp/commands`).
    pub script_dir: PathBuf,
    /// Interpreter used to run scripts (default: `/bin/bash`).
    pub shell_interpreter: PathBuf,
    /// Buffered capacity of the dispatch queue (default: `64`, minimum `1`).
    pub dispatch_queue_capacity: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `HOST`                    | `0.0.0.0`               |
    /// | `PORT`                    | `8081`                  |
    /// | `CORS_ORIGINS`            | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `10`                    |
    /// | `SUBMIT_TIMEOUT_SECS`     | `20`                    |
    /// | `SCRIPT_DIR`              | `/tmp/commands`         |
    /// | `SHELL_INTERPRETER`       | `/bin/bash`             |
    /// | `DISPATCH_QUEUE_CAPACITY` | `64`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8081".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let submit_timeout_secs: u64 = std::env::var("SUBMIT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "20".into())
            .parse()
            .expect("SUBMIT_TIMEOUT_SECS must be a valid u64");
        let submit_timeout_secs = bounded_submit_timeout(submit_timeout_secs, request_timeout_secs);

        let script_dir = std::env::var("SCRIPT_DIR")
            .unwrap_or_else(|_| "/tmp/commands".into())
            .into();

        let shell_interpreter = std::env::var("SHELL_INTERPRETER")
            .unwrap_or_else(|_| "/bin/bash".into())
            .into();

        let dispatch_queue_capacity: usize = std::env::var("DISPATCH_QUEUE_CAPACITY")
            .unwrap_or_else(|_| "64".into())
            .parse::<usize>()
            .expect("DISPATCH_QUEUE_CAPACITY must be a valid usize")
            .max(1);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            submit_timeout_secs,
            script_dir,
            shell_interpreter,
            dispatch_queue_capacity,
        }
    }
}

/// Clamp the submit deadline to at most one second under the request
/// timeout and at least one second.
fn bounded_submit_timeout(submit_secs: u64, request_secs: u64) -> u64 {
    submit_secs.min(request_secs.saturating_sub(1)).max(1)
}
