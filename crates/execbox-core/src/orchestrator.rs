//! Execution orchestrator.
//!
//! Composes the language registry, workspaces, the process engine and the
//! session registry into the public operations: `execute`, `send_input`,
//! `stop`, `evaluate`, `health`, `languages`, `subscribe` and `shutdown`.
//!
//! # Session lifecycle
//!
//! ```text
//! Created ─► Compiling ─► Running ⇄ WaitingForInput
//!               │            │
//!               ▼            ▼
//!         CompileFailed   Completed | TimedOut | Killed
//!               │            │
//!               └─────┬──────┘
//!                     ▼
//!                  Cleaned
//! ```
//!
//! Every launched process is owned by a supervisor task that purges the
//! session (registry entry and workspace) once the process is gone, so a
//! session never outlives its process by more than the drain grace.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::{self, CompileOutcome, ResourceLimits, StdinMode};
use crate::error::{Error, Result};
use crate::language::{self, LanguageInfo, LanguageSpec};
use crate::outcome::{
    ExecutionOutcome, ExecutionResult, ExecutionStatus, InputOutcome, StopOutcome, Termination,
};
use crate::prompt::{self, Interactivity};
use crate::session::{Backlog, ExecutionId, ExecutionSession, SessionEvent, SessionRegistry};
use crate::workspace::{Workspace, WorkspaceManager};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory under which per-execution workspaces are created.
    pub workspace_root: PathBuf,
    /// Wall-clock budget for compile and run, each.
    pub execution_timeout: Duration,
    /// Memory ceiling in MiB; `0` disables it.
    pub memory_limit_mb: u64,
    /// Wait before answering an interactive `execute`.
    pub interactive_grace: Duration,
    /// Wait after writing input before answering `send_input`.
    pub input_settle: Duration,
    /// Upper bound on draining sessions at shutdown (and on a single stop).
    pub shutdown_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("execbox"),
            execution_timeout: Duration::from_secs(30),
            memory_limit_mb: 512,
            interactive_grace: Duration::from_millis(300),
            input_settle: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.execution_timeout.is_zero() {
            return Err(Error::Config("execution timeout must be greater than zero".into()));
        }
        if self.workspace_root.as_os_str().is_empty() {
            return Err(Error::Config("workspace root must not be empty".into()));
        }
        Ok(())
    }
}

/// Request to run a program.
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    pub code: String,
    pub language: String,
    /// Stdin payload. A non-empty payload forces a batch run.
    pub stdin: Option<String>,
}

/// One graded test case.
#[derive(Debug, Clone, Default)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    /// Redact input and outputs in the result.
    pub hidden: bool,
}

/// Request to grade a program against test cases.
#[derive(Debug, Clone, Default)]
pub struct EvaluateRequest {
    pub code: String,
    pub language: String,
    pub test_cases: Vec<TestCase>,
}

/// Outcome of one test case.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub index: usize,
    pub passed: bool,
    pub hidden: bool,
    /// `None` for hidden cases.
    pub input: Option<String>,
    /// Normalised program output; `None` for hidden cases.
    pub stdout: Option<String>,
    /// Normalised expected output; `None` for hidden cases.
    pub expected_output: Option<String>,
    pub stderr: String,
    pub exit_code: i32,
    pub status: ExecutionStatus,
    pub execution_time_ms: u64,
}

/// Summary of an evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub language: &'static str,
    pub results: Vec<TestCaseResult>,
    pub passed: usize,
    pub total: usize,
    pub all_passed: bool,
    /// Compiler output when the compile step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<String>,
    pub total_time_ms: u64,
}

/// Service health.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub supported_languages: Vec<&'static str>,
    pub active_sessions: usize,
    pub version: &'static str,
}

/// Kills a batch execution if the awaiting caller goes away.
struct KillOnDrop(Option<Arc<ExecutionSession>>);

impl KillOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            if !session.is_finished() {
                tracing::debug!(execution_id = %session.id(), "Caller went away, killing execution");
                session.request_kill();
            }
        }
    }
}

/// The code execution service.
#[derive(Debug)]
pub struct Orchestrator {
    config: ExecutorConfig,
    limits: ResourceLimits,
    workspaces: WorkspaceManager,
    registry: Arc<SessionRegistry>,
}

impl Orchestrator {
    /// Create an orchestrator, preparing the workspace root.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        let workspaces = WorkspaceManager::new(&config.workspace_root)?;
        Ok(Self {
            limits: ResourceLimits::from_memory_mb(config.memory_limit_mb),
            config,
            workspaces,
            registry: Arc::new(SessionRegistry::new()),
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Run a program.
    ///
    /// Batch programs are awaited to completion and cleaned up. Interactive
    /// programs are answered after a short grace period and stay registered
    /// for [`send_input`](Self::send_input) and [`stop`](Self::stop).
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionOutcome> {
        self.execute_session(request).await.map(|(outcome, _)| outcome)
    }

    /// Like [`execute`](Self::execute), but interactive runs also hand back
    /// their session, which stays usable after the registry purges it.
    pub async fn execute_session(
        &self,
        request: ExecuteRequest,
    ) -> Result<(ExecutionOutcome, Option<Arc<ExecutionSession>>)> {
        let spec = validate_source(&request.language, &request.code)?;
        let started = Instant::now();

        let id = ExecutionId::new();
        let workspace = Arc::new(self.workspaces.create(&id).await?);
        let stdin = request.stdin.as_deref().filter(|payload| !payload.is_empty());

        let files = match workspace.materialize(spec, &request.code, stdin).await {
            Ok(files) => files,
            Err(e) => {
                workspace.destroy().await;
                return Err(e);
            }
        };

        match engine::compile(spec, &files.paths, self.config.execution_timeout).await {
            Ok(CompileOutcome::Success) => {}
            Ok(CompileOutcome::Failed { exit_code, stderr }) => {
                workspace.destroy().await;
                tracing::info!(execution_id = %id, language = spec.id, exit_code, "Compilation failed");
                let result = ExecutionResult::compile_error(exit_code, stderr, elapsed_ms(started));
                return Ok((
                    ExecutionOutcome::Completed {
                        id,
                        language: spec.id,
                        result,
                    },
                    None,
                ));
            }
            Err(e) => {
                workspace.destroy().await;
                return Err(e);
            }
        }

        let (launch, mode) = match files.stdin {
            Some(path) => (Interactivity::Batch, StdinMode::File(path)),
            None => match prompt::classify_source(spec, &request.code) {
                Interactivity::Batch => (Interactivity::Batch, StdinMode::Closed),
                likely => (likely, StdinMode::Interactive),
            },
        };

        let mut process = match engine::launch(spec, &files.paths, &self.limits, mode) {
            Ok(process) => process,
            Err(e) => {
                workspace.destroy().await;
                return Err(e);
            }
        };

        let stdin = process.take_stdin();
        let (session, kill_rx) = ExecutionSession::new(id.clone(), spec, workspace, launch, stdin);
        self.registry.put(session.clone()).await;

        tracing::info!(
            execution_id = %id,
            language = spec.id,
            interactive = session.is_interactive(),
            pid = ?process.pid(),
            command = process.command(),
            "Execution started"
        );

        let registry = self.registry.clone();
        let supervised = session.clone();
        let timeout = self.config.execution_timeout;
        tokio::spawn(async move {
            let termination = engine::supervise(supervised.clone(), process, timeout, kill_rx).await;
            match termination {
                Termination::TimedOut => {
                    tracing::info!(execution_id = %supervised.id(), "Execution timed out after {:?}", timeout)
                }
                Termination::Killed => tracing::info!(execution_id = %supervised.id(), "Execution killed"),
                Termination::Exited(code) => {
                    tracing::debug!(execution_id = %supervised.id(), exit_code = code, "Execution exited")
                }
            }
            registry.purge(&supervised).await;
        });

        if !session.is_interactive() {
            let guard = KillOnDrop(Some(session.clone()));
            let termination = session.wait().await;
            guard.disarm();
            self.registry.purge(&session).await;
            return Ok((
                ExecutionOutcome::Completed {
                    id,
                    language: spec.id,
                    result: session.result(termination),
                },
                None,
            ));
        }

        tokio::select! {
            _ = tokio::time::sleep(self.config.interactive_grace) => {}
            _ = session.wait() => {}
        }

        let outcome = ExecutionOutcome::Interactive {
            id,
            language: spec.id,
            snapshot: session.snapshot(),
        };
        Ok((outcome, Some(session)))
    }

    /// Write one line to a live session and report the output it produced.
    pub async fn send_input(&self, id: &ExecutionId, input: &str) -> Result<InputOutcome> {
        let session = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        if session.is_finished() {
            return Err(Error::NotFound(id.clone()));
        }

        let baseline = session.begin_input();
        session.write_line(input).await?;
        tracing::debug!(execution_id = %id, bytes = input.len(), "Input written");

        tokio::select! {
            _ = tokio::time::sleep(self.config.input_settle) => {}
            _ = session.wait() => {}
        }

        let snapshot = session.snapshot();
        let interactive = session.is_interactive();
        Ok(InputOutcome {
            delta: session.stdout_since(baseline),
            full_stdout: snapshot.stdout,
            stderr: snapshot.stderr,
            waiting: snapshot.waiting,
            needs_input: interactive && snapshot.waiting && snapshot.exit_code.is_none(),
            prompt: snapshot.prompt,
            interactive,
            language: session.language().id,
            exit_code: snapshot.exit_code,
        })
    }

    /// Kill a live session and delete its workspace.
    ///
    /// A second stop for the same id fails with [`Error::NotFound`].
    pub async fn stop(&self, id: &ExecutionId) -> Result<StopOutcome> {
        let session = self
            .registry
            .remove(id)
            .await
            .ok_or_else(|| Error::NotFound(id.clone()))?;

        let termination = self.terminate(&session).await;
        session.workspace().destroy().await;
        tracing::info!(execution_id = %id, exit_code = termination.exit_code(), "Execution stopped");

        Ok(StopOutcome {
            language: session.language().id,
            result: session.result(termination),
        })
    }

    /// Kill the session's process unless it already ended, bounded by the
    /// shutdown timeout.
    async fn terminate(&self, session: &ExecutionSession) -> Termination {
        if let Some(termination) = session.termination() {
            return termination;
        }
        session.request_kill();
        match tokio::time::timeout(self.config.shutdown_timeout, session.wait()).await {
            Ok(termination) => termination,
            Err(_) => {
                tracing::warn!(execution_id = %session.id(), "Process did not terminate in time");
                Termination::Killed
            }
        }
    }

    /// Compile once and run the program against every test case.
    pub async fn evaluate(&self, request: EvaluateRequest) -> Result<EvaluationReport> {
        let spec = validate_source(&request.language, &request.code)?;
        if request.test_cases.is_empty() {
            return Err(Error::InvalidRequest("testCases must not be empty".into()));
        }

        let started = Instant::now();
        let id = ExecutionId::new();
        let workspace = Arc::new(self.workspaces.create(&id).await?);

        let report = self.grade(&id, spec, &workspace, &request).await;
        workspace.destroy().await;

        let (results, compile_error) = report?;
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();

        tracing::info!(execution_id = %id, language = spec.id, passed, total, "Evaluation finished");

        Ok(EvaluationReport {
            language: spec.id,
            results,
            passed,
            total,
            all_passed: passed == total,
            compile_error,
            total_time_ms: elapsed_ms(started),
        })
    }

    async fn grade(
        &self,
        id: &ExecutionId,
        spec: &'static LanguageSpec,
        workspace: &Arc<Workspace>,
        request: &EvaluateRequest,
    ) -> Result<(Vec<TestCaseResult>, Option<String>)> {
        let files = workspace.materialize(spec, &request.code, None).await?;

        if let CompileOutcome::Failed { exit_code, stderr } =
            engine::compile(spec, &files.paths, self.config.execution_timeout).await?
        {
            let results = request
                .test_cases
                .iter()
                .enumerate()
                .map(|(index, case)| {
                    let result = ExecutionResult::compile_error(exit_code, stderr.clone(), 0);
                    case_result(index, case, result, false)
                })
                .collect();
            return Ok((results, Some(stderr)));
        }

        let mut results = Vec::with_capacity(request.test_cases.len());
        for (index, case) in request.test_cases.iter().enumerate() {
            let stdin_path = workspace.write_stdin(&case.input).await?;
            let process = engine::launch(spec, &files.paths, &self.limits, StdinMode::File(stdin_path))?;

            // Unregistered: the case is awaited inline and never addressable
            let (session, kill_rx) =
                ExecutionSession::new(id.clone(), spec, workspace.clone(), Interactivity::Batch, None);
            let termination =
                engine::supervise(session.clone(), process, self.config.execution_timeout, kill_rx).await;

            let result = session.result(termination);
            let passed = termination.status() == ExecutionStatus::Completed
                && normalize_output(&result.stdout) == normalize_output(&case.expected_output);
            results.push(case_result(index, case, result, passed));
        }

        Ok((results, None))
    }

    /// List every registry language with toolchain availability.
    pub fn languages(&self) -> Vec<LanguageInfo> {
        language::LANGUAGES.iter().map(LanguageSpec::info).collect()
    }

    /// Service status. Has no side effects.
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            supported_languages: language::supported_ids(),
            active_sessions: self.registry.len().await,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Subscribe to a live session's output stream.
    pub async fn subscribe(
        &self,
        id: &ExecutionId,
    ) -> Result<(Arc<ExecutionSession>, Backlog, broadcast::Receiver<SessionEvent>)> {
        let session = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        let (backlog, rx) = session.subscribe();
        Ok((session, backlog, rx))
    }

    /// Kill every live session and delete its workspace.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain().await;
        if sessions.is_empty() {
            return;
        }
        tracing::info!("Shutting down {} active execution(s)", sessions.len());

        let teardown = join_all(sessions.iter().map(|session| async move {
            session.request_kill();
            let _ = session.wait().await;
            session.workspace().destroy().await;
        }));

        if tokio::time::timeout(self.config.shutdown_timeout, teardown)
            .await
            .is_err()
        {
            tracing::warn!(
                "Shutdown timed out after {:?}; remaining workspaces are removed on drop",
                self.config.shutdown_timeout
            );
        }
    }
}

fn validate_source(language: &str, code: &str) -> Result<&'static LanguageSpec> {
    if language.trim().is_empty() {
        return Err(Error::InvalidRequest("language is required".into()));
    }
    if code.trim().is_empty() {
        return Err(Error::InvalidRequest("code is required".into()));
    }
    language::resolve(language)
}

fn case_result(index: usize, case: &TestCase, result: ExecutionResult, passed: bool) -> TestCaseResult {
    let reveal = |text: String| (!case.hidden).then_some(text);
    TestCaseResult {
        index,
        passed,
        hidden: case.hidden,
        input: reveal(case.input.clone()),
        stdout: reveal(normalize_output(&result.stdout)),
        expected_output: reveal(normalize_output(&case.expected_output)),
        stderr: result.stderr,
        exit_code: result.exit_code,
        status: result.status,
        execution_time_ms: result.elapsed_ms,
    }
}

/// Line endings unified and surrounding whitespace trimmed.
pub fn normalize_output(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_orchestrator(temp: &TempDir) -> Orchestrator {
        Orchestrator::new(ExecutorConfig {
            workspace_root: temp.path().join("ws"),
            execution_timeout: Duration::from_secs(10),
            ..ExecutorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ExecutorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution_timeout, Duration::from_secs(30));
        assert_eq!(config.memory_limit_mb, 512);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ExecutorConfig {
            execution_timeout: Duration::ZERO,
            ..ExecutorConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("  1\r\n2\r\n\n"), "1\n2");
        assert_eq!(normalize_output(""), "");
    }

    #[tokio::test]
    async fn test_execute_validation_precedes_filesystem() {
        let temp = TempDir::new().unwrap();
        let orchestrator = test_orchestrator(&temp);

        let missing_code = orchestrator
            .execute(ExecuteRequest {
                code: "  ".into(),
                language: "python".into(),
                stdin: None,
            })
            .await;
        assert!(matches!(missing_code, Err(Error::InvalidRequest(_))));

        let missing_language = orchestrator
            .execute(ExecuteRequest {
                code: "print(1)".into(),
                language: "".into(),
                stdin: None,
            })
            .await;
        assert!(matches!(missing_language, Err(Error::InvalidRequest(_))));

        let unsupported = orchestrator
            .execute(ExecuteRequest {
                code: "DISPLAY 'HI'".into(),
                language: "cobol".into(),
                stdin: None,
            })
            .await;
        assert!(matches!(unsupported, Err(Error::UnsupportedLanguage(_))));

        // Nothing was allocated
        let entries = std::fs::read_dir(temp.path().join("ws")).unwrap().count();
        assert_eq!(entries, 0);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let temp = TempDir::new().unwrap();
        let orchestrator = test_orchestrator(&temp);
        let id = ExecutionId::new();

        assert!(matches!(orchestrator.stop(&id).await, Err(Error::NotFound(_))));
        assert!(matches!(
            orchestrator.send_input(&id, "1").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(orchestrator.subscribe(&id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_evaluate_requires_test_cases() {
        let temp = TempDir::new().unwrap();
        let orchestrator = test_orchestrator(&temp);
        let result = orchestrator
            .evaluate(EvaluateRequest {
                code: "print(1)".into(),
                language: "python".into(),
                test_cases: vec![],
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_health_has_no_side_effects() {
        let temp = TempDir::new().unwrap();
        let orchestrator = test_orchestrator(&temp);
        let first = orchestrator.health().await;
        let second = orchestrator.health().await;
        assert_eq!(first.status, "healthy");
        assert_eq!(first.active_sessions, 0);
        assert_eq!(first.supported_languages, second.supported_languages);
        assert_eq!(first.supported_languages.len(), 5);
    }

    #[test]
    fn test_hidden_case_is_redacted() {
        let case = TestCase {
            input: "1 2".into(),
            expected_output: "3\n".into(),
            hidden: true,
        };
        let result = ExecutionResult {
            stdout: "3\r\n".into(),
            stderr: String::new(),
            exit_code: 0,
            status: ExecutionStatus::Completed,
            elapsed_ms: 5,
        };
        let graded = case_result(0, &case, result, true);
        assert!(graded.passed);
        assert!(graded.input.is_none());
        assert!(graded.stdout.is_none());
        assert!(graded.expected_output.is_none());
    }
}
