//! Integration tests for protocol message serialization.
//!
//! Checks the camelCase wire shape of every response body.

use execbox_core::{
    ExecutionId, ExecutionOutcome, ExecutionResult, ExecutionStatus, InputOutcome, Interactivity,
    InteractiveSnapshot, SessionEvent, StopOutcome,
};
use execbox_server::protocol::*;

#[test]
fn test_completed_execute_response() {
    let outcome = ExecutionOutcome::Completed {
        id: ExecutionId::from("id-1"),
        language: "python",
        result: ExecutionResult {
            stdout: "hi\n".into(),
            stderr: String::new(),
            exit_code: 0,
            status: ExecutionStatus::Completed,
            elapsed_ms: 12,
        },
    };

    let json = serde_json::to_value(ApiResponse::from_outcome(outcome)).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["executionId"], "id-1");
    assert_eq!(json["data"]["stdout"], "hi\n");
    assert_eq!(json["data"]["exitCode"], 0);
    assert_eq!(json["data"]["status"], "completed");
    assert_eq!(json["data"]["executionTime"], 12);
    assert!(json.get("message").is_none());
}

#[test]
fn test_interactive_execute_response() {
    let outcome = ExecutionOutcome::Interactive {
        id: ExecutionId::from("id-2"),
        language: "cpp",
        snapshot: InteractiveSnapshot {
            stdout: "Age? ".into(),
            stderr: String::new(),
            interactivity: Interactivity::ConfirmedWaiting {
                prompt: "Age? ".into(),
            },
            prompt: "Age? ".into(),
            waiting: true,
            exit_code: None,
            elapsed_ms: 300,
        },
    };

    let json = serde_json::to_value(ApiResponse::from_outcome(outcome)).unwrap();
    let data = &json["data"];
    assert_eq!(data["isInteractive"], true);
    assert_eq!(data["isWaitingForInput"], true);
    assert_eq!(data["waitingPrompt"], "Age? ");
    assert_eq!(data["language"], "cpp");
    assert!(data.get("exitCode").is_none());
}

#[test]
fn test_input_response() {
    let outcome = InputOutcome {
        delta: "Hello, Ada\n".into(),
        full_stdout: "Name? Hello, Ada\n".into(),
        stderr: String::new(),
        waiting: false,
        needs_input: false,
        prompt: "Hello, Ada".into(),
        interactive: true,
        language: "python",
        exit_code: Some(0),
    };

    let json = serde_json::to_value(ApiResponse::ok(InputData::from(outcome))).unwrap();
    let data = &json["data"];
    assert_eq!(data["stdout"], "Hello, Ada\n");
    assert_eq!(data["fullStdout"], "Name? Hello, Ada\n");
    assert_eq!(data["needsInput"], false);
    assert_eq!(data["isInteractive"], true);
    assert_eq!(data["exitCode"], 0);
}

#[test]
fn test_stop_response() {
    let outcome = StopOutcome {
        language: "java",
        result: ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -2,
            status: ExecutionStatus::Killed,
            elapsed_ms: 40,
        },
    };

    let json = serde_json::to_value(
        ApiResponse::ok(StopData::from(outcome)).with_message("Execution stopped"),
    )
    .unwrap();
    assert_eq!(json["message"], "Execution stopped");
    assert_eq!(json["data"]["exitCode"], -2);
    assert_eq!(json["data"]["status"], "killed");
}

#[test]
fn test_request_bodies_accept_camel_case() {
    let body: SendInputBody =
        serde_json::from_str(r#"{"executionId":"abc","input":"42"}"#).unwrap();
    assert_eq!(body.execution_id, "abc");
    assert_eq!(body.input.as_deref(), Some("42"));

    let body: EvaluateBody = serde_json::from_str(
        r#"{"code":"x","language":"python","testCases":[{"input":"1","expectedOutput":"1","hidden":true},{"expectedOutput":"2"}]}"#,
    )
    .unwrap();
    assert_eq!(body.test_cases.len(), 2);
    assert!(body.test_cases[0].hidden);
    assert_eq!(body.test_cases[1].input, "");
    assert!(!body.test_cases[1].hidden);
}

#[test]
fn test_stream_messages() {
    let stdout: StreamMessage = SessionEvent::Stdout { data: "x".into() }.into();
    assert_eq!(
        serde_json::to_value(&stdout).unwrap(),
        serde_json::json!({"type": "stdout", "data": "x"})
    );

    let exit: StreamMessage = SessionEvent::Exit {
        exit_code: -1,
        status: ExecutionStatus::TimedOut,
    }
    .into();
    assert_eq!(
        serde_json::to_value(&exit).unwrap(),
        serde_json::json!({"type": "exit", "exitCode": -1, "status": "timed_out"})
    );

    let parsed: StreamMessage =
        serde_json::from_str(r#"{"type":"error","message":"lagged"}"#).unwrap();
    assert_eq!(
        parsed,
        StreamMessage::Error {
            message: "lagged".into()
        }
    );
}
