//! HTTP and WebSocket routes for the execbox server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        DefaultBodyLimit, Path, State, WebSocketUpgrade,
        rejection::JsonRejection,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use execbox_core::{
    Backlog, EvaluationReport, ExecutionId, ExecutionSession, LanguageInfo, Orchestrator, SessionEvent,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{ServerError, ServerResult};
use crate::protocol::{
    ApiResponse, EvaluateBody, ExecuteBody, ExecuteData, HealthResponse, InputData, SendInputBody,
    StopBody, StopData, StreamMessage,
};

/// Default request body limit (5 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 5 * 1024 * 1024;

/// Application state shared across handlers.
pub struct AppState {
    /// The execution service.
    pub orchestrator: Arc<Orchestrator>,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.body_limit;

    Router::new()
        .route("/execute", post(execute_handler))
        .route("/send-input", post(send_input_handler))
        .route("/stop", post(stop_handler))
        .route("/evaluate", post(evaluate_handler))
        .route("/languages", get(languages_handler))
        .route("/health", get(health_handler))
        .route("/ws/{execution_id}", get(ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> ServerResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ServerError::BadRequest(rejection.body_text()))
}

fn require_id(execution_id: &str) -> ServerResult<ExecutionId> {
    let trimmed = execution_id.trim();
    if trimmed.is_empty() {
        return Err(ServerError::BadRequest("executionId is required".into()));
    }
    Ok(ExecutionId::from(trimmed))
}

/// Run a program.
async fn execute_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExecuteBody>, JsonRejection>,
) -> ServerResult<Json<ApiResponse<ExecuteData>>> {
    let body = parse_body(payload)?;
    let outcome = state.orchestrator.execute(body.into()).await?;
    Ok(Json(ApiResponse::from_outcome(outcome)))
}

/// Write a line to an interactive execution.
async fn send_input_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendInputBody>, JsonRejection>,
) -> ServerResult<Json<ApiResponse<InputData>>> {
    let body = parse_body(payload)?;
    let id = require_id(&body.execution_id)?;
    let Some(input) = body.input else {
        return Err(ServerError::BadRequest("input is required".into()));
    };

    let outcome = state.orchestrator.send_input(&id, &input).await?;
    Ok(Json(ApiResponse::ok(InputData::from(outcome))))
}

/// Kill an execution.
async fn stop_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StopBody>, JsonRejection>,
) -> ServerResult<Json<ApiResponse<StopData>>> {
    let body = parse_body(payload)?;
    let id = require_id(&body.execution_id)?;

    let outcome = state.orchestrator.stop(&id).await?;
    Ok(Json(
        ApiResponse::ok(StopData::from(outcome)).with_message("Execution stopped"),
    ))
}

/// Grade a program against test cases.
async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EvaluateBody>, JsonRejection>,
) -> ServerResult<Json<ApiResponse<EvaluationReport>>> {
    let body = parse_body(payload)?;
    let report = state.orchestrator.evaluate(body.into()).await?;
    Ok(Json(ApiResponse::ok(report)))
}

/// List supported languages.
async fn languages_handler(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<LanguageInfo>>> {
    Json(ApiResponse::ok(state.orchestrator.languages()))
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        report: state.orchestrator.health().await,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// WebSocket upgrade handler. Unknown ids are rejected before the upgrade.
async fn ws_handler(
    Path(execution_id): Path<String>,
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let subscription = match require_id(&execution_id) {
        Ok(id) => state.orchestrator.subscribe(&id).await.map_err(ServerError::from),
        Err(e) => Err(e),
    };
    let (session, backlog, rx) = match subscription {
        Ok(subscription) => subscription,
        Err(e) => return e.into_response(),
    };

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_stream(socket, session, backlog, rx))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

fn encode(message: &StreamMessage) -> Option<Message> {
    serde_json::to_string(message)
        .ok()
        .map(|json| Message::Text(json.into()))
}

/// Stream a session's output and forward client text frames to its stdin.
async fn handle_stream(
    socket: WebSocket,
    session: Arc<ExecutionSession>,
    backlog: Backlog,
    mut rx: broadcast::Receiver<SessionEvent>,
) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(tokio::sync::Mutex::new(sender));

    // Replay what was produced before the subscription
    {
        let mut initial = Vec::new();
        if !backlog.stdout.is_empty() {
            initial.push(StreamMessage::Stdout { data: backlog.stdout });
        }
        if !backlog.stderr.is_empty() {
            initial.push(StreamMessage::Stderr { data: backlog.stderr });
        }
        if let Some(termination) = backlog.termination {
            initial.push(
                SessionEvent::Exit {
                    exit_code: termination.exit_code(),
                    status: termination.status(),
                }
                .into(),
            );
        }

        let mut sender = sender.lock().await;
        for message in initial.iter().filter_map(encode) {
            if sender.send(message).await.is_err() {
                return;
            }
        }
        if backlog.termination.is_some() {
            let _ = sender.close().await;
            return;
        }
    }

    let sender_clone = sender.clone();
    let execution_id = session.id().clone();
    let forward_task = tokio::spawn(async move {
        loop {
            let message = match rx.recv().await {
                Ok(event) => StreamMessage::from(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => StreamMessage::Error {
                    message: format!("stream lagged, {} chunk(s) dropped", skipped),
                },
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let is_exit = matches!(message, StreamMessage::Exit { .. });

            let Some(frame) = encode(&message) else {
                continue;
            };
            let mut sender = sender_clone.lock().await;
            if sender.send(frame).await.is_err() {
                break;
            }
            if is_exit {
                let _ = sender.close().await;
                break;
            }
        }
        tracing::debug!(execution_id = %execution_id, "Stream forwarder finished");
    });

    // Handle incoming client frames
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Err(e) = session.write_line(text.as_str()).await {
                    let error = StreamMessage::Error {
                        message: e.to_string(),
                    };
                    if let Some(frame) = encode(&error) {
                        let _ = sender.lock().await.send(frame).await;
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    forward_task.abort();
}
