//! Results reported to callers.
//!
//! A failed compile, a crash, a timeout and an explicit stop are all normal
//! program outcomes here. They are distinguished by [`ExecutionStatus`] and,
//! for engine-initiated termination, by reserved exit codes that no real
//! process can produce.

use serde::Serialize;

use crate::prompt::Interactivity;
use crate::session::ExecutionId;

/// Exit code reported when the wall-clock budget expired.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code reported when an execution was stopped on request.
pub const KILLED_EXIT_CODE: i32 = -2;

/// Exit code reported for a failed compile when the compiler gave none.
pub const COMPILE_ERROR_EXIT_CODE: i32 = 1;

/// How a launched process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own (signal deaths map to `128 + signal`).
    Exited(i32),
    /// Killed after exceeding the wall-clock timeout.
    TimedOut,
    /// Killed by an explicit stop or shutdown.
    Killed,
}

impl Termination {
    pub fn exit_code(&self) -> i32 {
        match self {
            Termination::Exited(code) => *code,
            Termination::TimedOut => TIMEOUT_EXIT_CODE,
            Termination::Killed => KILLED_EXIT_CODE,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            Termination::Exited(_) => ExecutionStatus::Completed,
            Termination::TimedOut => ExecutionStatus::TimedOut,
            Termination::Killed => ExecutionStatus::Killed,
        }
    }
}

/// Distinguishing field for terminal results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The program ran and exited; the exit code may still be non-zero.
    Completed,
    /// The compile step failed; no run process was started.
    CompileError,
    /// The program exceeded its wall-clock budget.
    TimedOut,
    /// The program was stopped on request.
    Killed,
}

/// Final captured output of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub status: ExecutionStatus,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    /// Result for a compile step that failed.
    pub fn compile_error(exit_code: i32, stderr: String, elapsed_ms: u64) -> Self {
        Self {
            stdout: String::new(),
            stderr,
            exit_code,
            status: ExecutionStatus::CompileError,
            elapsed_ms,
        }
    }
}

/// Point-in-time view of a live (or just finished) interactive session.
#[derive(Debug, Clone)]
pub struct InteractiveSnapshot {
    pub stdout: String,
    pub stderr: String,
    pub interactivity: Interactivity,
    /// Most recent output line, verbatim.
    pub prompt: String,
    /// Whether the prompt heuristic fires.
    pub waiting: bool,
    /// Set once the process has ended.
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
}

/// Outcome of an `execute` call.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Batch run (or failed compile), fully resolved and cleaned up.
    Completed {
        id: ExecutionId,
        language: &'static str,
        result: ExecutionResult,
    },
    /// Interactive run; the session stays alive for follow-up calls.
    Interactive {
        id: ExecutionId,
        language: &'static str,
        snapshot: InteractiveSnapshot,
    },
}

impl ExecutionOutcome {
    pub fn id(&self) -> &ExecutionId {
        match self {
            ExecutionOutcome::Completed { id, .. } | ExecutionOutcome::Interactive { id, .. } => id,
        }
    }
}

/// Outcome of a `send_input` call.
#[derive(Debug, Clone)]
pub struct InputOutcome {
    /// Stdout produced since the input was written.
    pub delta: String,
    pub full_stdout: String,
    pub stderr: String,
    pub waiting: bool,
    /// Interactive and waiting.
    pub needs_input: bool,
    pub prompt: String,
    pub interactive: bool,
    pub language: &'static str,
    pub exit_code: Option<i32>,
}

/// Outcome of a `stop` call.
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub language: &'static str,
    pub result: ExecutionResult,
}
