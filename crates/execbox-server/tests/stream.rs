//! Integration tests for the `/ws/{executionId}` output stream.
//!
//! Serves the router on an ephemeral port and talks to it with a real
//! WebSocket client. Skipped when python3 is not installed.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::Request;
use execbox_core::{ExecutorConfig, Orchestrator};
use execbox_server::{AppState, create_router};
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt; // for `oneshot`

fn test_router(temp: &TempDir) -> Router {
    let orchestrator = Orchestrator::new(ExecutorConfig {
        workspace_root: temp.path().join("ws"),
        execution_timeout: Duration::from_secs(15),
        interactive_grace: Duration::from_millis(1500),
        ..ExecutorConfig::default()
    })
    .unwrap();
    create_router(Arc::new(AppState::new(Arc::new(orchestrator))))
}

async fn start_interactive(router: Router, code: &str) -> String {
    let body = serde_json::json!({ "code": code, "language": "python" }).to_string();
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/execute")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data"]["isInteractive"], true, "{}", json);
    json["executionId"].as_str().unwrap().to_string()
}

async fn serve(router: Router) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn frame_json(message: Message) -> serde_json::Value {
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn test_stream_replays_backlog_and_forwards_input() {
    if which::which("python3").is_err() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let router = test_router(&temp);

    let id = start_interactive(
        router.clone(),
        "name = input('Name? ')\nprint('Hello, ' + name)",
    )
    .await;
    let addr = serve(router).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/{}", addr, id))
        .await
        .unwrap();

    let first = frame_json(socket.next().await.unwrap().unwrap());
    assert_eq!(first, serde_json::json!({ "type": "stdout", "data": "Name? " }));

    socket.send(Message::text("Ada")).await.unwrap();

    let mut stdout = String::new();
    let exit = loop {
        let message = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("stream stalled")
            .expect("stream ended before exit")
            .unwrap();
        if message.is_close() {
            panic!("closed before exit frame; stdout so far: {:?}", stdout);
        }
        let frame = frame_json(message);
        match frame["type"].as_str().unwrap() {
            "stdout" => stdout.push_str(frame["data"].as_str().unwrap()),
            "exit" => break frame,
            _ => {}
        }
    };

    assert!(stdout.contains("Hello, Ada"), "stdout: {:?}", stdout);
    assert_eq!(exit["exitCode"], 0);
    assert_eq!(exit["status"], "completed");
}
