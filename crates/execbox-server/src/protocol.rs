//! Request and response bodies for the execbox HTTP and WebSocket API.
//!
//! Every JSON field is camelCase. Successful responses are wrapped in an
//! [`ApiResponse`] envelope; failures use [`ErrorBody`].

use execbox_core::{
    EvaluateRequest, ExecuteRequest, ExecutionOutcome, ExecutionStatus, HealthReport, InputOutcome,
    SessionEvent, StopOutcome, TestCase,
};
use serde::{Deserialize, Serialize};

/// Body of `POST /execute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteBody {
    pub code: String,
    pub language: String,
    pub stdin: Option<String>,
}

impl From<ExecuteBody> for ExecuteRequest {
    fn from(body: ExecuteBody) -> Self {
        ExecuteRequest {
            code: body.code,
            language: body.language,
            stdin: body.stdin,
        }
    }
}

/// Body of `POST /send-input`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendInputBody {
    pub execution_id: String,
    /// Required; an empty string sends a bare newline.
    pub input: Option<String>,
}

/// Body of `POST /stop`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StopBody {
    pub execution_id: String,
}

/// One test case in `POST /evaluate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestCaseBody {
    pub input: String,
    pub expected_output: String,
    pub hidden: bool,
}

/// Body of `POST /evaluate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluateBody {
    pub code: String,
    pub language: String,
    pub test_cases: Vec<TestCaseBody>,
}

impl From<EvaluateBody> for EvaluateRequest {
    fn from(body: EvaluateBody) -> Self {
        EvaluateRequest {
            code: body.code,
            language: body.language,
            test_cases: body
                .test_cases
                .into_iter()
                .map(|case| TestCase {
                    input: case.input,
                    expected_output: case.expected_output,
                    hidden: case.hidden,
                })
                .collect(),
        }
    }
}

/// Success envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            execution_id: None,
            message: None,
            data,
        }
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Error body: `{success: false, message, error}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    /// Stable machine code, e.g. `not_found`.
    pub error: &'static str,
}

/// Data of a terminal `execute` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedData {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub status: ExecutionStatus,
    pub language: &'static str,
    /// Milliseconds.
    pub execution_time: u64,
}

/// Data of an interactive `execute` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveData {
    pub stdout: String,
    pub stderr: String,
    pub is_interactive: bool,
    pub is_waiting_for_input: bool,
    pub waiting_prompt: String,
    pub language: &'static str,
    /// Milliseconds.
    pub execution_time: u64,
    /// Present once the program has ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Data of an `execute` response.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExecuteData {
    Completed(CompletedData),
    Interactive(InteractiveData),
}

impl ApiResponse<ExecuteData> {
    pub fn from_outcome(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed { id, language, result } => {
                ApiResponse::ok(ExecuteData::Completed(CompletedData {
                    stdout: result.stdout,
                    stderr: result.stderr,
                    exit_code: result.exit_code,
                    status: result.status,
                    language,
                    execution_time: result.elapsed_ms,
                }))
                .with_execution_id(id.to_string())
            }
            ExecutionOutcome::Interactive { id, language, snapshot } => {
                ApiResponse::ok(ExecuteData::Interactive(InteractiveData {
                    stdout: snapshot.stdout,
                    stderr: snapshot.stderr,
                    is_interactive: true,
                    is_waiting_for_input: snapshot.waiting,
                    waiting_prompt: snapshot.prompt,
                    language,
                    execution_time: snapshot.elapsed_ms,
                    exit_code: snapshot.exit_code,
                }))
                .with_execution_id(id.to_string())
            }
        }
    }
}

/// Data of a `send-input` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputData {
    /// Output produced since the input was written.
    pub stdout: String,
    pub full_stdout: String,
    pub stderr: String,
    pub is_waiting_for_input: bool,
    pub needs_input: bool,
    pub waiting_prompt: String,
    pub is_interactive: bool,
    pub language: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl From<InputOutcome> for InputData {
    fn from(outcome: InputOutcome) -> Self {
        Self {
            stdout: outcome.delta,
            full_stdout: outcome.full_stdout,
            stderr: outcome.stderr,
            is_waiting_for_input: outcome.waiting,
            needs_input: outcome.needs_input,
            waiting_prompt: outcome.prompt,
            is_interactive: outcome.interactive,
            language: outcome.language,
            exit_code: outcome.exit_code,
        }
    }
}

/// Data of a `stop` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopData {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub status: ExecutionStatus,
    pub language: &'static str,
}

impl From<StopOutcome> for StopData {
    fn from(outcome: StopOutcome) -> Self {
        Self {
            stdout: outcome.result.stdout,
            stderr: outcome.result.stderr,
            exit_code: outcome.result.exit_code,
            status: outcome.result.status,
            language: outcome.language,
        }
    }
}

/// Body of `GET /health` (not enveloped).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    /// RFC 3339.
    pub timestamp: String,
}

/// Messages sent over `GET /ws/{executionId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamMessage {
    /// A chunk of standard output.
    Stdout { data: String },
    /// A chunk of standard error.
    Stderr { data: String },
    /// The program ended; no further messages follow.
    Exit { exit_code: i32, status: String },
    /// The stream could not keep up or input could not be written.
    Error { message: String },
}

impl From<SessionEvent> for StreamMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Stdout { data } => StreamMessage::Stdout { data },
            SessionEvent::Stderr { data } => StreamMessage::Stderr { data },
            SessionEvent::Exit { exit_code, status } => StreamMessage::Exit {
                exit_code,
                status: status_label(status).to_string(),
            },
        }
    }
}

/// Wire label of an execution status.
pub fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::CompileError => "compile_error",
        ExecutionStatus::TimedOut => "timed_out",
        ExecutionStatus::Killed => "killed",
    }
}
