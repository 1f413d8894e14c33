//! Run command implementation for execbox CLI.
//!
//! Executes one source file through the orchestrator. Programs that read
//! stdin without a `--stdin` file are attached to the terminal: their output
//! is streamed live and lines typed on our stdin are forwarded to them.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use execbox_core::language::{from_extension, supported_ids};
use execbox_core::{
    ExecuteRequest, ExecutionOutcome, ExecutionSession, ExecutionStatus, Orchestrator, SessionEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::ExecutorArgs;
use crate::colors;

/// Process exit code reported for a timed-out program (as `timeout(1)`).
const TIMEOUT_EXIT: i32 = 124;

/// Process exit code reported for a killed program (as SIGKILL).
const KILLED_EXIT: i32 = 137;

/// Map an execution result to this process's exit code.
pub fn process_exit_code(status: ExecutionStatus, exit_code: i32) -> i32 {
    match status {
        ExecutionStatus::TimedOut => TIMEOUT_EXIT,
        ExecutionStatus::Killed => KILLED_EXIT,
        ExecutionStatus::Completed | ExecutionStatus::CompileError => exit_code,
    }
}

/// Execute a source file, returning the exit code to report.
pub async fn execute(
    file: &Path,
    language: Option<&str>,
    stdin: Option<&Path>,
    executor: &ExecutorArgs,
) -> anyhow::Result<i32> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Source file not found: {}", file.display()))?;

    let language = match language {
        Some(language) => language.to_string(),
        None => {
            let ext = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
            from_extension(ext)
                .map(|spec| spec.id.to_string())
                .with_context(|| {
                    format!(
                        "Cannot infer language from '{}'; pass --language (one of: {})",
                        file.display(),
                        supported_ids().join(", ")
                    )
                })?
        }
    };

    let stdin = match stdin {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Stdin file not found: {}", path.display()))?,
        ),
        None => None,
    };

    let orchestrator = Orchestrator::new(executor.to_config())?;
    let (outcome, live) = orchestrator
        .execute_session(ExecuteRequest {
            code,
            language,
            stdin,
        })
        .await?;

    let exit_code = match (outcome, live) {
        (ExecutionOutcome::Completed { result, .. }, _) => {
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            report_status(result.status, result.exit_code);
            process_exit_code(result.status, result.exit_code)
        }
        (ExecutionOutcome::Interactive { .. }, Some(session)) => {
            // The backlog holds everything emitted so far, even if the program already exited
            let (backlog, rx) = session.subscribe();
            print!("{}", backlog.stdout);
            eprint!("{}", backlog.stderr);
            colors::flush_stdout();

            if backlog.termination.is_none() {
                attach(&session, rx).await;
            }
            let termination = session.wait().await;
            session.workspace().destroy().await;
            report_status(termination.status(), termination.exit_code());
            process_exit_code(termination.status(), termination.exit_code())
        }
        (ExecutionOutcome::Interactive { snapshot, .. }, None) => {
            print!("{}", snapshot.stdout);
            eprint!("{}", snapshot.stderr);
            snapshot.exit_code.unwrap_or_default()
        }
    };

    colors::flush_stdout();
    orchestrator.shutdown().await;
    Ok(exit_code)
}

/// Stream live output and forward terminal input until the program exits.
async fn attach(session: &Arc<ExecutionSession>, mut rx: broadcast::Receiver<SessionEvent>) {
    let writer = session.clone();
    let input_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if writer.write_line(&line).await.is_err() {
                break;
            }
        }
        // Our EOF becomes the program's EOF
        writer.close_stdin().await;
    });

    loop {
        match rx.recv().await {
            Ok(SessionEvent::Stdout { data }) => {
                print!("{}", data);
                colors::flush_stdout();
            }
            Ok(SessionEvent::Stderr { data }) => eprint!("{}", data),
            Ok(SessionEvent::Exit { .. }) | Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Output stream lagged, {} chunk(s) dropped", skipped);
            }
        }
    }

    input_task.abort();
}

fn report_status(status: ExecutionStatus, exit_code: i32) {
    match status {
        ExecutionStatus::Completed => {}
        ExecutionStatus::CompileError => {
            eprintln!("{}Compilation failed{} (exit code {})", colors::RED, colors::RESET, exit_code)
        }
        ExecutionStatus::TimedOut => {
            eprintln!("{}Execution timed out{}", colors::YELLOW, colors::RESET)
        }
        ExecutionStatus::Killed => eprintln!("{}Execution killed{}", colors::YELLOW, colors::RESET),
    }
}
