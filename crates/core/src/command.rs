//! Command lifecycle vocabulary shared by the supervisor, the store and
//! the HTTP layer.
//!
//! A command is created `running` and leaves that state exactly once,
//! either `finished` (with an exit code or a signal) or `error` (with one
//! of the descriptions below).

use std::process::ExitStatus;

// ---------------------------------------------------------------------------
// Status descriptions
// ---------------------------------------------------------------------------

/// The run was cancelled through the API or by server shutdown.
pub const DESC_CANCELLED: &str = "cancelled";

/// Waiting on the subprocess failed, or it ended in an unrecognised way.
pub const DESC_INTERNAL: &str = "internal error";

/// Crash recovery found the command still running at startup.
pub const DESC_SERVER_DOWN: &str = "server got down";

/// The store rejected an output append.
pub const DESC_APPEND_FAILED: &str = "failed to append output";

/// Reading the subprocess stdout pipe failed.
pub const DESC_READ_FAILED: &str = "failed to read output";

/// The configured interpreter could not be found or is not executable.
pub const DESC_INTERPRETER_MISSING: &str = "failed to locate interpreter";

/// The stdout pipe was not available after spawning.
pub const DESC_STDOUT_UNAVAILABLE: &str = "failed to attach output stream";

/// Spawning the interpreter failed.
pub const DESC_START_FAILED: &str = "failed to start command";

/// Intake committed the command but the executor queue was closed.
pub const DESC_DISPATCH_FAILED: &str = "failed to dispatch";

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

/// How a subprocess ended, in native process-termination encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by the given signal number.
    Signaled(i32),
}

impl Termination {
    /// Classify an [`ExitStatus`].
    ///
    /// Returns `None` for statuses that carry neither an exit code nor a
    /// terminating signal (e.g. stopped processes).
    pub fn from_status(status: ExitStatus) -> Option<Self> {
        use std::os::unix::process::ExitStatusExt;

        if let Some(code) = status.code() {
            return Some(Self::Exited(code));
        }
        status.signal().map(Self::Signaled)
    }

    pub fn exit_code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Signaled(_) => None,
        }
    }

    pub fn signal(self) -> Option<i32> {
        match self {
            Self::Exited(_) => None,
            Self::Signaled(signal) => Some(signal),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;

    use super::*;

    #[test]
    fn exited_status_carries_only_exit_code() {
        // Raw wait status for `exit 3` is the code shifted into the high byte.
        let termination = Termination::from_status(ExitStatus::from_raw(3 << 8));
        assert_eq!(termination, Some(Termination::Exited(3)));
        assert_eq!(termination.and_then(Termination::exit_code), Some(3));
        assert_eq!(termination.and_then(Termination::signal), None);
    }

    #[test]
    fn signaled_status_carries_only_signal() {
        let termination = Termination::from_status(ExitStatus::from_raw(9));
        assert_eq!(termination, Some(Termination::Signaled(9)));
        assert_eq!(termination.and_then(Termination::exit_code), None);
        assert_eq!(termination.and_then(Termination::signal), Some(9));
    }

    #[test]
    fn stopped_status_is_not_a_termination() {
        // WIFSTOPPED: low byte 0x7f, stop signal in the high byte.
        assert_eq!(Termination::from_status(ExitStatus::from_raw(0x137f)), None);
    }
}
