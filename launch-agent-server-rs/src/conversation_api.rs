use crate::error::ApiError;
use crate::handlers::AppState;
use crate::models::{ChatRequest, ChatResponse, ClearMemoryRequest, StatusResponse, WsInbound, WsOutbound};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use launch_sdk_rs::error::ErrorKind;
use launch_sdk_rs::session::StreamEvent;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn error_kind_name(kind: Option<ErrorKind>) -> &'static str {
    match kind {
        Some(ErrorKind::MalformedResponse) => "malformed_response",
        Some(ErrorKind::Cancelled) => "cancelled",
        Some(ErrorKind::Upstream) | None => "upstream",
    }
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::bad_request("Message cannot be empty"));
    }

    let (thread_id, result) = state
        .sessions
        .execute(&req.message, req.thread_id.as_deref())
        .await;

    if result.error {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_kind_name(result.error_kind),
            result.output,
        ));
    }

    Ok(Json(ChatResponse {
        thread_id,
        message: result.output,
        tool_usage: result.tool_usage,
    }))
}

pub async fn clear_memory(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClearMemoryRequest>,
) -> impl IntoResponse {
    match state.sessions.clear_memory(&req.thread_id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(StatusResponse::success(format!(
                "Memory cleared for thread {}",
                req.thread_id
            ))),
        ),
        Ok(false) => (
            StatusCode::OK,
            Json(StatusResponse::error(format!(
                "No memory found for thread {}",
                req.thread_id
            ))),
        ),
        Err(e) => {
            warn!(thread_id = %req.thread_id, "Failed to clear memory: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse::error(e.to_string())),
            )
        }
    }
}

pub async fn agent_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
}

async fn send_frame(socket: &mut WebSocket, frame: &WsOutbound) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode frame: {}", e);
            true
        }
    }
}

enum Inbound {
    Text(String),
    Closed,
    Ignored,
}

/// Answers pings in place. Everything except text and close is ignored.
async fn read_frame(socket: &mut WebSocket, client_id: &str) -> Inbound {
    match socket.recv().await {
        Some(Ok(Message::Text(text))) => Inbound::Text(text.to_string()),
        Some(Ok(Message::Ping(data))) => {
            if socket.send(Message::Pong(data)).await.is_err() {
                Inbound::Closed
            } else {
                Inbound::Ignored
            }
        }
        Some(Ok(Message::Close(_))) | None => Inbound::Closed,
        Some(Ok(_)) => Inbound::Ignored,
        Some(Err(e)) => {
            debug!(client_id = %client_id, "WebSocket recv error: {}", e);
            Inbound::Closed
        }
    }
}

pub async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, client_id: String) {
    info!(client_id = %client_id, "WebSocket client connected");
    let mut pending: VecDeque<String> = VecDeque::new();

    loop {
        let text = match pending.pop_front() {
            Some(text) => text,
            None => match read_frame(&mut socket, &client_id).await {
                Inbound::Text(text) => text,
                Inbound::Ignored => continue,
                Inbound::Closed => break,
            },
        };

        if !run_turn(&mut socket, &state, &client_id, &text, &mut pending).await {
            break;
        }
    }

    info!(client_id = %client_id, "WebSocket client disconnected");
}

/// Handles one inbound frame. Returns false once the socket is gone.
async fn run_turn(
    socket: &mut WebSocket,
    state: &Arc<AppState>,
    client_id: &str,
    text: &str,
    pending: &mut VecDeque<String>,
) -> bool {
    let inbound = match serde_json::from_str::<WsInbound>(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!(client_id = %client_id, "Invalid JSON frame: {}", e);
            let frame = WsOutbound::Error {
                message: format!("Invalid JSON: {}", e),
                thread_id: None,
            };
            return send_frame(socket, &frame).await;
        }
    };

    let Some(message) = inbound.message.filter(|m| !m.trim().is_empty()) else {
        let frame = WsOutbound::Error {
            message: "Message is required".to_string(),
            thread_id: inbound.thread_id,
        };
        return send_frame(socket, &frame).await;
    };

    let cancel = CancellationToken::new();
    let (thread_id, mut events) =
        state
            .sessions
            .stream(message, inbound.thread_id.as_deref(), cancel.clone());

    let thinking = WsOutbound::Thinking {
        message: "Thinking...".to_string(),
        thread_id: thread_id.clone(),
    };
    if !send_frame(socket, &thinking).await {
        cancel.cancel();
        return false;
    }

    let streaming = state.config.agent.enable_streaming;
    loop {
        tokio::select! {
            event = events.recv() => {
                let frame = match event {
                    Some(StreamEvent::Token(token)) => {
                        if !streaming {
                            continue;
                        }
                        WsOutbound::Token { token, thread_id: thread_id.clone() }
                    }
                    Some(StreamEvent::Completed(result)) => WsOutbound::Response {
                        message: result.output,
                        tool_usage: result.tool_usage,
                        thread_id: thread_id.clone(),
                    },
                    Some(StreamEvent::Failed(result)) => WsOutbound::Error {
                        message: result.output,
                        thread_id: Some(thread_id.clone()),
                    },
                    None => return true,
                };
                let terminal = !matches!(frame, WsOutbound::Token { .. });
                if !send_frame(socket, &frame).await {
                    cancel.cancel();
                    return false;
                }
                if terminal {
                    return true;
                }
            }
            inbound = read_frame(socket, client_id) => match inbound {
                Inbound::Text(text) => pending.push_back(text),
                Inbound::Ignored => {}
                Inbound::Closed => {
                    info!(client_id = %client_id, thread_id = %thread_id, "Socket closed mid-turn, cancelling");
                    cancel.cancel();
                    return false;
                }
            },
        }
    }
}
