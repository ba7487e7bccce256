use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::web::{
    protocol::{CreateSessionRequest, SessionId},
    session_manager::{SessionError, SessionManager},
    transport::{dispatch_text, Outbound},
};

/// Application state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub session_manager: Arc<SessionManager>,
}

/// Create router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // API routes
        .route("/api/health", get(health))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/:id", delete(close_session))
        // WebSocket endpoints
        .route("/ws/term", get(websocket_query_handler))
        .route("/ws/:session_id", get(websocket_handler))
        .with_state(state)
}

/// GET /api/health - Liveness and session count
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "now": chrono::Utc::now().to_rfc3339(),
        "sessions": state.session_manager.session_count().await,
    }))
}

/// GET /api/sessions - List all active sessions
async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.session_manager.list_sessions().await;
    Json(serde_json::json!({ "items": sessions }))
}

/// POST /api/sessions - Spawn a process and open a session for it
async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if payload.command.trim().is_empty() {
        return Err(AppError::BadRequest("command is required".into()));
    }

    let session_id = state.session_manager.create_session(payload).await?;
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "ws_url": format!("ws://{}/ws/term?session_id={}", host, session_id),
    })))
}

/// DELETE /api/sessions/:id - Terminate a session
async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let terminated = match parse_session_id(&id) {
        Some(session_id) => state.session_manager.terminate(&session_id).await,
        None => false,
    };
    if !terminated {
        return Err(AppError::NotFound("session not found".into()));
    }

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct TermQuery {
    session_id: Option<String>,
}

/// GET /ws/term?session_id=... - WebSocket endpoint
async fn websocket_query_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TermQuery>,
) -> Response {
    let session_id = query.session_id.unwrap_or_default();
    ws.on_upgrade(move |socket| handle_websocket(socket, state, session_id))
}

/// GET /ws/:session_id - WebSocket endpoint
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, session_id))
}

fn parse_session_id(raw: &str) -> Option<SessionId> {
    Uuid::parse_str(raw.trim()).ok()
}

async fn reject(mut socket: WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Cow::Borrowed(reason),
    };
    if let Err(e) = socket.send(WsMessage::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState, raw_session_id: String) {
    let client_id = Uuid::new_v4();
    let manager = state.session_manager;

    let Some(session_id) = parse_session_id(&raw_session_id) else {
        tracing::warn!(session = %raw_session_id, "WebSocket: invalid or missing session id");
        reject(socket, "session not found").await;
        return;
    };

    // Create channel for sending frames to this client
    let (ws_sender, mut ws_receiver) = mpsc::unbounded_channel();

    if let Err(e) = manager.attach_client(&session_id, client_id, ws_sender).await {
        tracing::warn!(session = %session_id, error = %e, "WebSocket: attach refused");
        reject(socket, "session not found").await;
        return;
    }

    // Split socket
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Spawn task to send frames from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = ws_receiver.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    if ws_sink.send(WsMessage::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let frame = CloseFrame {
                        code: close_code::NORMAL,
                        reason: Cow::Borrowed("session ended"),
                    };
                    let _ = ws_sink.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    // Handle incoming WebSocket messages
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            WsMessage::Text(text) => {
                dispatch_text(&manager, &session_id, client_id, &text).await;
            }
            WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => dispatch_text(&manager, &session_id, client_id, &text).await,
                Err(_) => {
                    manager
                        .send_error(&session_id, client_id, "invalid message".to_string())
                        .await;
                }
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // Client disconnected
    manager.detach_client(&session_id, client_id).await;
    send_task.abort();
}

/// Error handling
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Session(SessionError),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::Session(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Session(err @ SessionError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            AppError::Session(err) => {
                tracing::error!(error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
