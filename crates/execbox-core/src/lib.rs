//! Core engine for the execbox sandboxed code execution service.
//!
//! This crate provides:
//! - Language registry with compile and run command templates
//! - Ephemeral per-execution workspaces
//! - Process engine with timeouts, memory ceilings and process-group kills
//! - Prompt heuristic for programs blocked on stdin
//! - Session registry and the orchestrator tying it all together

pub mod engine;
pub mod error;
pub mod language;
pub mod orchestrator;
pub mod outcome;
pub mod prompt;
pub mod session;
pub mod workspace;

pub use error::{Error, Result};
pub use language::{LanguageInfo, LanguageSpec, MemoryPolicy};
pub use orchestrator::{
    EvaluateRequest, EvaluationReport, ExecuteRequest, ExecutorConfig, HealthReport, Orchestrator,
    TestCase, TestCaseResult, normalize_output,
};
pub use outcome::{
    COMPILE_ERROR_EXIT_CODE, ExecutionOutcome, ExecutionResult, ExecutionStatus, InputOutcome,
    InteractiveSnapshot, KILLED_EXIT_CODE, StopOutcome, TIMEOUT_EXIT_CODE, Termination,
};
pub use prompt::{Interactivity, PromptTracker};
pub use session::{Backlog, ExecutionId, ExecutionSession, SessionEvent, SessionRegistry};
pub use workspace::{Workspace, WorkspaceManager};
