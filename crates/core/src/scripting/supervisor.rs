//! Subprocess supervision for a single command run.
//!
//! [`Supervisor::run`] starts the configured interpreter against a stored
//! script, streams stdout into a [`CommandSink`] one chunk at a time, and
//! finishes with exactly one terminal write. Cancelling the token kills
//! the interpreter and records the run as `cancelled`.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

use super::sink::CommandSink;
use crate::command::{
    Termination, DESC_APPEND_FAILED, DESC_CANCELLED, DESC_INTERNAL, DESC_INTERPRETER_MISSING,
    DESC_READ_FAILED, DESC_START_FAILED, DESC_STDOUT_UNAVAILABLE,
};
use crate::types::DbId;

/// Size of a single stdout read. Each non-empty read becomes one append.
pub const READ_CHUNK_BYTES: usize = 4096;

/// Why the interpreter could not be started.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("interpreter not found: {0}")]
    InterpreterNotFound(PathBuf),

    #[error("interpreter is not executable: {0}")]
    NotExecutable(PathBuf),

    #[error("failed to spawn {path}: {source}")]
    Spawn { path: PathBuf, source: io::Error },

    #[error("stdout pipe was not attached")]
    StdoutUnavailable,
}

impl LaunchError {
    /// Status description recorded on the command for this failure.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InterpreterNotFound(_) | Self::NotExecutable(_) => DESC_INTERPRETER_MISSING,
            Self::Spawn { .. } => DESC_START_FAILED,
            Self::StdoutUnavailable => DESC_STDOUT_UNAVAILABLE,
        }
    }
}

/// Result of a run as written to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(Termination),
    Failed(&'static str),
}

/// Runs scripts through one configured shell interpreter.
#[derive(Debug, Clone)]
pub struct Supervisor {
    interpreter: PathBuf,
}

impl Supervisor {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// Resolve the interpreter to an executable file.
    ///
    /// Paths containing a separator are checked as given; bare names are
    /// searched for in `PATH`.
    pub fn locate_interpreter(&self) -> Result<PathBuf, LaunchError> {
        if self.interpreter.components().count() > 1 {
            return check_executable(&self.interpreter);
        }

        let search = std::env::var_os("PATH").unwrap_or_default();
        std::env::split_paths(&search)
            .map(|dir| dir.join(&self.interpreter))
            .find(|candidate| check_executable(candidate).is_ok())
            .ok_or_else(|| LaunchError::InterpreterNotFound(self.interpreter.clone()))
    }

    /// Start the interpreter on `script_path` with stdout piped.
    ///
    /// Stdin and stderr are discarded. The child is killed if dropped.
    pub fn spawn(&self, script_path: &Path) -> Result<(Child, ChildStdout), LaunchError> {
        let interpreter = self.locate_interpreter()?;

        let mut cmd = Command::new(&interpreter);
        cmd.arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            path: interpreter,
            source,
        })?;
        let stdout = child.stdout.take().ok_or(LaunchError::StdoutUnavailable)?;

        Ok((child, stdout))
    }

    /// Execute the script for `id` and record its terminal status.
    ///
    /// A failed terminal write is logged and otherwise ignored; the
    /// command stays `running` until crash recovery picks it up.
    pub async fn run<S: CommandSink>(
        &self,
        id: DbId,
        script_path: &Path,
        cancel: &CancellationToken,
        sink: &S,
    ) -> RunOutcome {
        let outcome = self.execute(id, script_path, cancel, sink).await;

        let written = match outcome {
            RunOutcome::Finished(termination) => sink.finish(id, termination).await,
            RunOutcome::Failed(description) => sink.fail(id, description).await,
        };

        match (&outcome, written) {
            (_, Err(e)) => tracing::error!(
                command_id = %id,
                outcome = ?outcome,
                error = %e,
                "Failed to record terminal status",
            ),
            (RunOutcome::Finished(termination), Ok(())) => tracing::info!(
                command_id = %id,
                exit_code = ?termination.exit_code(),
                signal = ?termination.signal(),
                "Command finished",
            ),
            (RunOutcome::Failed(description), Ok(())) => tracing::warn!(
                command_id = %id,
                description,
                "Command ended with error",
            ),
        }

        outcome
    }

    async fn execute<S: CommandSink>(
        &self,
        id: DbId,
        script_path: &Path,
        cancel: &CancellationToken,
        sink: &S,
    ) -> RunOutcome {
        let (mut child, mut stdout) = match self.spawn(script_path) {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(command_id = %id, error = %e, "Failed to launch script");
                return RunOutcome::Failed(e.description());
            }
        };
        tracing::debug!(command_id = %id, pid = ?child.id(), "Script started");

        let mut decoder = ChunkDecoder::default();
        let mut buf = vec![0u8; READ_CHUNK_BYTES];

        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = kill_and_reap(&mut child).await;
                    return RunOutcome::Failed(DESC_CANCELLED);
                }
                read = stdout.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(command_id = %id, error = %e, "Failed to read script output");
                    let _ = kill_and_reap(&mut child).await;
                    return RunOutcome::Failed(DESC_READ_FAILED);
                }
            };

            // An append already in flight is not interrupted by cancellation.
            let chunk = decoder.push(&buf[..n]);
            if let Err(outcome) = append(sink, id, &chunk, &mut child).await {
                return outcome;
            }
        }

        let tail = decoder.finish();
        if let Err(outcome) = append(sink, id, &tail, &mut child).await {
            return outcome;
        }

        let waited = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };

        match waited {
            None => {
                let _ = kill_and_reap(&mut child).await;
                RunOutcome::Failed(DESC_CANCELLED)
            }
            Some(Err(e)) => {
                tracing::error!(command_id = %id, error = %e, "Failed to wait for script");
                RunOutcome::Failed(DESC_INTERNAL)
            }
            Some(Ok(status)) => match Termination::from_status(status) {
                Some(termination) => RunOutcome::Finished(termination),
                None => {
                    tracing::error!(command_id = %id, ?status, "Unrecognised exit status");
                    RunOutcome::Failed(DESC_INTERNAL)
                }
            },
        }
    }
}

/// Append `chunk` if non-empty; on store failure kill the child and yield
/// the failed outcome.
async fn append<S: CommandSink>(
    sink: &S,
    id: DbId,
    chunk: &str,
    child: &mut Child,
) -> Result<(), RunOutcome> {
    if chunk.is_empty() {
        return Ok(());
    }
    match sink.append_output(id, chunk).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(command_id = %id, error = %e, "Failed to append output");
            let _ = kill_and_reap(child).await;
            Err(RunOutcome::Failed(DESC_APPEND_FAILED))
        }
    }
}

async fn kill_and_reap(child: &mut Child) -> io::Result<ExitStatus> {
    // Fails only if the child already exited, in which case wait() reaps it.
    let _ = child.start_kill();
    child.wait().await
}

fn check_executable(path: &Path) -> Result<PathBuf, LaunchError> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| LaunchError::InterpreterNotFound(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(LaunchError::InterpreterNotFound(path.to_path_buf()));
    }
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(LaunchError::NotExecutable(path.to_path_buf()));
    }
    Ok(path.to_path_buf())
}

/// Incremental UTF-8 decoding of stdout reads.
///
/// A multi-byte sequence split across reads is held back until the next
/// read completes it. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flush whatever is left once the stream has ended.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::scripting::sink::memory::{MemorySink, Terminal};
    use crate::scripting::test_helpers::{store_script, temp_storage, TEST_INTERPRETER};

    async fn run_script(body: &str) -> (MemorySink, DbId, RunOutcome) {
        let (_dir, storage) = temp_storage().await;
        let (id, path) = store_script(&storage, body).await;
        let sink = MemorySink::new();
        let outcome = Supervisor::new(TEST_INTERPRETER)
            .run(id, &path, &CancellationToken::new(), &sink)
            .await;
        (sink, id, outcome)
    }

    #[tokio::test]
    async fn echo_finishes_with_exit_code_zero() {
        let (sink, id, outcome) = run_script("#!/bin/sh\necho hi\n").await;

        assert_eq!(outcome, RunOutcome::Finished(Termination::Exited(0)));
        let record = sink.record(id).expect("record");
        assert_eq!(record.output, "hi\n");
        assert_eq!(record.terminal, Some(Terminal::Finished(Termination::Exited(0))));
        assert_eq!(record.terminal_writes, 1);
    }

    #[tokio::test]
    async fn nonzero_exit_is_finished_not_error() {
        let (sink, id, outcome) = run_script("#!/bin/sh\necho partial\nexit 42\n").await;

        assert_eq!(outcome, RunOutcome::Finished(Termination::Exited(42)));
        assert_eq!(sink.record(id).expect("record").output, "partial\n");
    }

    #[tokio::test]
    async fn signal_termination_records_signal() {
        let (sink, id, outcome) = run_script("#!/bin/sh\nkill -9 $$\n").await;

        assert_eq!(outcome, RunOutcome::Finished(Termination::Signaled(9)));
        assert_eq!(
            sink.terminal(id),
            Some(Terminal::Finished(Termination::Signaled(9)))
        );
    }

    #[tokio::test]
    async fn output_is_appended_in_order() {
        let body = "#!/bin/sh\nfor i in 1 2 3; do echo line$i; sleep 0.05; done\n";
        let (sink, id, _) = run_script(body).await;

        let record = sink.record(id).expect("record");
        assert_eq!(record.output, "line1\nline2\nline3\n");
        assert_eq!(record.appends.concat(), record.output);
        assert!(record.appends.iter().all(|chunk| !chunk.is_empty()));
    }

    #[tokio::test]
    async fn script_without_output_has_no_appends() {
        let (sink, id, outcome) = run_script("#!/bin/sh\ntrue\n").await;

        assert_eq!(outcome, RunOutcome::Finished(Termination::Exited(0)));
        assert!(sink.record(id).expect("record").appends.is_empty());
    }

    #[tokio::test]
    async fn cancellation_kills_and_records_cancelled() {
        let (_dir, storage) = temp_storage().await;
        let (id, path) = store_script(&storage, "#!/bin/sh\necho started\nsleep 30\n").await;
        let sink = MemorySink::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            Supervisor::new(TEST_INTERPRETER).run(id, &path, &cancel, &sink),
        )
        .await
        .expect("run should stop promptly after cancellation");

        assert_eq!(outcome, RunOutcome::Failed(DESC_CANCELLED));
        assert_eq!(sink.terminal(id), Some(Terminal::Error(DESC_CANCELLED.into())));
    }

    #[tokio::test]
    async fn cancellation_after_stdout_closed_still_cancels() {
        // The script closes stdout and keeps running, so the stream loop
        // ends and cancellation is observed while waiting for exit.
        let body = "#!/bin/sh\necho bye\nexec 1>&-\nsleep 30\n";
        let (_dir, storage) = temp_storage().await;
        let (id, path) = store_script(&storage, body).await;
        let sink = MemorySink::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            Supervisor::new(TEST_INTERPRETER).run(id, &path, &cancel, &sink),
        )
        .await
        .expect("run should stop promptly after cancellation");

        assert_eq!(outcome, RunOutcome::Failed(DESC_CANCELLED));
        assert_eq!(sink.record(id).expect("record").output, "bye\n");
    }

    #[tokio::test]
    async fn missing_interpreter_fails_with_step_description() {
        let (_dir, storage) = temp_storage().await;
        let (id, path) = store_script(&storage, "#!/bin/sh\necho hi\n").await;
        let sink = MemorySink::new();

        let outcome = Supervisor::new("/nonexistent/shell")
            .run(id, &path, &CancellationToken::new(), &sink)
            .await;

        assert_eq!(outcome, RunOutcome::Failed(DESC_INTERPRETER_MISSING));
        assert_eq!(
            sink.terminal(id),
            Some(Terminal::Error(DESC_INTERPRETER_MISSING.into()))
        );
    }

    #[tokio::test]
    async fn append_failure_aborts_run() {
        let (_dir, storage) = temp_storage().await;
        let (id, path) = store_script(&storage, "#!/bin/sh\necho hi\nsleep 30\n").await;
        let sink = MemorySink::new();
        sink.reject_appends();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            Supervisor::new(TEST_INTERPRETER).run(id, &path, &CancellationToken::new(), &sink),
        )
        .await
        .expect("append failure should abort without waiting for the script");

        assert_eq!(outcome, RunOutcome::Failed(DESC_APPEND_FAILED));
        assert_eq!(sink.terminal(id), Some(Terminal::Error(DESC_APPEND_FAILED.into())));
    }

    #[tokio::test]
    async fn terminal_write_failure_still_returns_outcome() {
        let (_dir, storage) = temp_storage().await;
        let (id, path) = store_script(&storage, "#!/bin/sh\nexit 0\n").await;
        let sink = MemorySink::new();
        sink.reject_terminal_writes();

        let outcome = Supervisor::new(TEST_INTERPRETER)
            .run(id, &path, &CancellationToken::new(), &sink)
            .await;

        assert_eq!(outcome, RunOutcome::Finished(Termination::Exited(0)));
        let record = sink.record(id).expect("record");
        assert_eq!(record.terminal, None);
        assert_eq!(record.terminal_writes, 1);
    }

    #[test]
    fn locate_interpreter_searches_path_for_bare_names() {
        let located = Supervisor::new("sh").locate_interpreter().expect("sh on PATH");
        assert!(located.ends_with("sh"));
        assert!(located.components().count() > 1);
    }

    #[test]
    fn locate_interpreter_rejects_non_executable_file() {
        let file = tempfile::NamedTempFile::new().expect("create temp file");
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
            .expect("chmod");

        let err = Supervisor::new(file.path()).locate_interpreter().unwrap_err();
        assert_matches!(err, LaunchError::NotExecutable(_));
        assert_eq!(err.description(), DESC_INTERPRETER_MISSING);
    }

    #[test]
    fn decoder_carries_split_multibyte_sequences() {
        let mut decoder = ChunkDecoder::default();
        let bytes = "é!".as_bytes();

        assert_eq!(decoder.push(&bytes[..1]), "");
        assert_eq!(decoder.push(&bytes[1..]), "é!");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.push(b"a\xffb"), "a\u{FFFD}b");
        // A dangling lead byte at end of stream is flushed lossily.
        assert_eq!(decoder.push(b"c\xe2"), "c");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
