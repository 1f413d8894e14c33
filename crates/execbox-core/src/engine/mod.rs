//! Process engine.
//!
//! Spawns compile and run commands inside a workspace, enforces the
//! wall-clock timeout and memory ceiling, and streams output into the
//! owning [`ExecutionSession`].
//!
//! # Lifecycle
//!
//! ```text
//! compile (optional, bounded by the timeout)
//!     │
//!     └── launch ──► supervise
//!                      ├── pump stdout ─┐
//!                      ├── pump stderr ─┼──► ExecutionSession
//!                      └── select! { exit | timeout | kill }
//!                              │
//!                              └── kill process group, drain, finish
//! ```

mod limits;
mod output;

pub use limits::{ResourceLimits, exit_code_of, kill_process_group};
pub use output::Utf8Decoder;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::language::{BuildPaths, CommandLine, LanguageSpec};
use crate::outcome::{COMPILE_ERROR_EXIT_CODE, TIMEOUT_EXIT_CODE, Termination};
use crate::session::{ExecutionSession, OutputStream};

/// How long output readers may keep draining after the process has ended.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Result of the compile step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Artifact produced, or the language has no compile step.
    Success,
    /// The compiler rejected the source or ran out of time.
    Failed { exit_code: i32, stderr: String },
}

/// Where the run process reads standard input from.
#[derive(Debug, Clone)]
pub enum StdinMode {
    /// A pipe held by the session for later `send_input` calls.
    Interactive,
    /// A materialized payload file.
    File(PathBuf),
    /// Immediate EOF.
    Closed,
}

/// A spawned run process awaiting supervision.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    pid: Option<u32>,
    command: String,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The command line, for logging.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Take the stdin pipe (only present for [`StdinMode::Interactive`]).
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }
}

fn command_for(cmdline: &CommandLine, paths: &BuildPaths) -> Command {
    let mut cmd = Command::new(&cmdline.program);
    cmd.args(&cmdline.args)
        .current_dir(&paths.dir)
        .kill_on_drop(true);
    cmd
}

/// Run the language's compile step, if any.
///
/// Compiler diagnostics come from stderr, falling back to stdout when a
/// toolchain reports there.
///
/// # Errors
/// [`Error::Spawn`] if the compiler could not be started.
pub async fn compile(
    spec: &LanguageSpec,
    paths: &BuildPaths,
    timeout: Duration,
) -> Result<CompileOutcome> {
    let Some(template) = spec.compile else {
        return Ok(CompileOutcome::Success);
    };

    let cmdline = template(paths);
    tracing::debug!(language = spec.id, "Compiling: {}", cmdline);

    let mut cmd = command_for(&cmdline, paths);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Compilers get the process group but no memory ceiling
    ResourceLimits::default().apply(spec, &mut cmd);

    let child = cmd.spawn().map_err(|source| Error::Spawn {
        program: cmdline.program.clone(),
        source,
    })?;
    let pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => Ok(CompileOutcome::Success),
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stderr = if !stderr.is_empty() {
                stderr
            } else {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if stdout.is_empty() {
                    "Compilation error".to_string()
                } else {
                    stdout
                }
            };
            Ok(CompileOutcome::Failed {
                exit_code: output.status.code().unwrap_or(COMPILE_ERROR_EXIT_CODE),
                stderr,
            })
        }
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(_) => {
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            tracing::warn!(language = spec.id, "Compilation timed out after {:?}", timeout);
            Ok(CompileOutcome::Failed {
                exit_code: TIMEOUT_EXIT_CODE,
                stderr: format!("Compilation timed out after {} ms", timeout.as_millis()),
            })
        }
    }
}

/// Spawn the run command.
///
/// # Errors
/// [`Error::Workspace`] if the stdin file cannot be opened, [`Error::Spawn`]
/// if the program cannot be started.
pub fn launch(
    spec: &LanguageSpec,
    paths: &BuildPaths,
    limits: &ResourceLimits,
    stdin: StdinMode,
) -> Result<RunningProcess> {
    let cmdline = (spec.run)(paths, limits.run_flag_memory(spec));

    let stdin = match stdin {
        StdinMode::Interactive => Stdio::piped(),
        StdinMode::Closed => Stdio::null(),
        StdinMode::File(path) => {
            let file = std::fs::File::open(&path)
                .map_err(|source| Error::Workspace { path, source })?;
            Stdio::from(file)
        }
    };

    let mut cmd = command_for(&cmdline, paths);
    cmd.stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    limits.apply(spec, &mut cmd);

    let child = cmd.spawn().map_err(|source| Error::Spawn {
        program: cmdline.program.clone(),
        source,
    })?;
    let pid = child.id();

    tracing::debug!(language = spec.id, ?pid, "Launched: {}", cmdline);

    Ok(RunningProcess {
        child,
        pid,
        command: cmdline.to_string(),
    })
}

/// Drive a launched process to termination.
///
/// Races process exit against the wall-clock `timeout` and a kill request.
/// Whatever wins, the whole process group is killed, the output readers are
/// drained and the session is marked finished before this returns.
pub async fn supervise(
    session: Arc<ExecutionSession>,
    mut process: RunningProcess,
    timeout: Duration,
    kill_rx: oneshot::Receiver<()>,
) -> Termination {
    let stdout_task = process.child.stdout.take().map(|reader| {
        tokio::spawn(output::pump(reader, session.clone(), OutputStream::Stdout))
    });
    let stderr_task = process.child.stderr.take().map(|reader| {
        tokio::spawn(output::pump(reader, session.clone(), OutputStream::Stderr))
    });

    let termination = tokio::select! {
        status = process.child.wait() => match status {
            Ok(status) => Termination::Exited(exit_code_of(status)),
            Err(e) => {
                tracing::warn!(execution_id = %session.id(), "Failed to wait for process: {}", e);
                Termination::Killed
            }
        },
        _ = tokio::time::sleep(timeout) => Termination::TimedOut,
        Ok(()) = kill_rx => Termination::Killed,
    };

    if let Some(pid) = process.pid {
        kill_process_group(pid);
    }
    if !matches!(termination, Termination::Exited(_)) {
        if let Err(e) = process.child.kill().await {
            tracing::debug!(execution_id = %session.id(), "Kill after {:?}: {}", termination, e);
        }
    }

    for task in [stdout_task, stderr_task].into_iter().flatten() {
        let abort = task.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, task).await.is_err() {
            abort.abort();
        }
    }

    session.close_stdin().await;
    session.finish(termination);

    tracing::debug!(
        execution_id = %session.id(),
        exit_code = termination.exit_code(),
        "Process finished: {}",
        process.command
    );

    termination
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language;
    use crate::prompt::Interactivity;
    use crate::session::ExecutionId;
    use crate::workspace::WorkspaceManager;
    use tempfile::TempDir;

    fn has(bin: &str) -> bool {
        which::which(bin).is_ok()
    }

    #[tokio::test]
    async fn test_compile_is_noop_for_interpreted() {
        let spec = language::resolve("python").unwrap();
        let paths = BuildPaths::new(spec, std::path::Path::new("/nonexistent"));
        let outcome = compile(spec, &paths, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, CompileOutcome::Success);
    }

    #[tokio::test]
    async fn test_compile_error_reports_diagnostics() {
        if !has("g++") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path()).unwrap();
        let workspace = manager.create(&ExecutionId::new()).await.unwrap();
        let spec = language::resolve("cpp").unwrap();
        let files = workspace
            .materialize(spec, "int main() { return undefined_name; }", None)
            .await
            .unwrap();

        match compile(spec, &files.paths, Duration::from_secs(30)).await.unwrap() {
            CompileOutcome::Failed { exit_code, stderr } => {
                assert_ne!(exit_code, 0);
                assert!(stderr.contains("undefined_name"));
            }
            CompileOutcome::Success => panic!("expected compile failure"),
        }
    }

    #[tokio::test]
    async fn test_launch_and_supervise_batch() {
        if !has("python3") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path()).unwrap();
        let id = ExecutionId::new();
        let workspace = Arc::new(manager.create(&id).await.unwrap());
        let spec = language::resolve("python").unwrap();
        let files = workspace
            .materialize(spec, "import sys\nprint('out')\nprint('err', file=sys.stderr)\nsys.exit(3)", None)
            .await
            .unwrap();

        let process = launch(spec, &files.paths, &ResourceLimits::default(), StdinMode::Closed).unwrap();
        let (session, kill_rx) =
            ExecutionSession::new(id, spec, workspace.clone(), Interactivity::Batch, None);

        let termination = supervise(session.clone(), process, Duration::from_secs(10), kill_rx).await;
        assert_eq!(termination, Termination::Exited(3));
        assert_eq!(session.stdout(), "out\n");
        assert_eq!(session.stderr(), "err\n");
        workspace.destroy().await;
    }

    #[tokio::test]
    async fn test_supervise_times_out() {
        if !has("python3") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path()).unwrap();
        let id = ExecutionId::new();
        let workspace = Arc::new(manager.create(&id).await.unwrap());
        let spec = language::resolve("python").unwrap();
        let files = workspace
            .materialize(spec, "import time\nprint('start')\ntime.sleep(30)", None)
            .await
            .unwrap();

        let process = launch(spec, &files.paths, &ResourceLimits::default(), StdinMode::Closed).unwrap();
        let (session, kill_rx) =
            ExecutionSession::new(id, spec, workspace.clone(), Interactivity::Batch, None);

        let started = std::time::Instant::now();
        let termination = supervise(session.clone(), process, Duration::from_millis(500), kill_rx).await;
        assert_eq!(termination, Termination::TimedOut);
        assert_eq!(termination.exit_code(), TIMEOUT_EXIT_CODE);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(session.stdout(), "start\n");
    }

    #[tokio::test]
    async fn test_supervise_honours_kill_request() {
        if !has("python3") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path()).unwrap();
        let id = ExecutionId::new();
        let workspace = Arc::new(manager.create(&id).await.unwrap());
        let spec = language::resolve("python").unwrap();
        let files = workspace
            .materialize(spec, "import time\ntime.sleep(30)", None)
            .await
            .unwrap();

        let process = launch(spec, &files.paths, &ResourceLimits::default(), StdinMode::Closed).unwrap();
        let (session, kill_rx) =
            ExecutionSession::new(id, spec, workspace.clone(), Interactivity::Batch, None);

        let supervisor = tokio::spawn(supervise(session.clone(), process, Duration::from_secs(30), kill_rx));
        assert!(session.request_kill());
        assert_eq!(supervisor.await.unwrap(), Termination::Killed);
        assert_eq!(session.wait().await, Termination::Killed);
    }

    #[tokio::test]
    async fn test_launch_missing_program() {
        let temp = TempDir::new().unwrap();
        let spec = language::resolve("cpp").unwrap();
        // Artifact was never compiled
        let paths = BuildPaths::new(spec, temp.path());
        match launch(spec, &paths, &ResourceLimits::default(), StdinMode::Closed) {
            Err(Error::Spawn { program, .. }) => assert!(program.ends_with("main")),
            other => panic!("expected spawn error, got {:?}", other.map(|p| p.command().to_string())),
        }
    }
}
