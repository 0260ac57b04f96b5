use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rapport_domain::error::DomainError;
use rapport_domain::presence::{CLOSE_UNAUTHORIZED, RealtimeEvent, SessionFrame};
use serde::Deserialize;
use serde_json::Value;

use crate::middleware::verify_token;
use crate::{observability, state::AppState};

#[derive(Debug, Deserialize)]
pub(super) struct SocketParams {
    token: Option<String>,
}

/// Envelope for client frames: `{"type": "chat:send", "data": {..}}`.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct SendPayload {
    #[serde(alias = "connectionId")]
    connection_id: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct TypingPayload {
    #[serde(alias = "connectionId")]
    connection_id: String,
    #[serde(default = "typing_default", alias = "isTyping")]
    is_typing: bool,
}

fn typing_default() -> bool {
    true
}

type SocketSink = SplitSink<WebSocket, Message>;

pub(super) async fn websocket(
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = params
        .token
        .as_deref()
        .and_then(|token| verify_token(&state.config.jwt_secret, token));
    ws.on_upgrade(move |socket| async move {
        match user_id {
            Some(user_id) => run_session(socket, state, user_id).await,
            None => reject(socket).await,
        }
    })
}

async fn reject(mut socket: WebSocket) {
    tracing::debug!("websocket rejected: missing or invalid token");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNAUTHORIZED,
            reason: "unauthorized".into(),
        })))
        .await;
}

async fn run_session(socket: WebSocket, state: AppState, user_id: String) {
    let (ticket, mut frames) = state.hub.session_opened(&user_id).await;
    observability::register_session_opened();
    tracing::info!(user_id = %user_id, session_id = %ticket.session_id, "realtime session opened");

    let (mut sender, mut incoming) = socket.split();
    let connected = RealtimeEvent::Connected {
        user_id: user_id.clone(),
    };

    if send_event(&mut sender, &connected).await.is_ok() {
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    match frame {
                        Some(SessionFrame::Event(event)) => {
                            if send_event(&mut sender, &event).await.is_err() {
                                break;
                            }
                        }
                        Some(SessionFrame::Probe) => {
                            if sender.send(Message::Ping(Vec::new())).await.is_err() {
                                break;
                            }
                        }
                        Some(SessionFrame::Close { code, reason }) => {
                            let _ = sender
                                .send(Message::Close(Some(CloseFrame {
                                    code,
                                    reason: reason.into(),
                                })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
                incoming = incoming.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = handle_client_frame(&state, &user_id, &text).await
                                && send_event(&mut sender, &reply).await.is_err()
                            {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            state.hub.registry().acknowledge(&ticket).await;
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    state.hub.session_closed(&ticket).await;
    observability::register_session_closed();
    tracing::info!(user_id = %user_id, session_id = %ticket.session_id, "realtime session closed");
}

/// Applies one client frame and returns the reply owed to the sender, if any.
async fn handle_client_frame(state: &AppState, user_id: &str, raw: &str) -> Option<RealtimeEvent> {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(_) => return Some(error_event("malformed frame")),
    };

    match frame.kind.as_str() {
        "chat:send" => {
            let Ok(payload) = serde_json::from_value::<SendPayload>(frame.data) else {
                return Some(error_event("chat:send requires connection_id and content"));
            };
            let outcome = state
                .chat
                .send(user_id, &payload.connection_id, &payload.content)
                .await;
            Some(match outcome {
                Ok(receipt) => RealtimeEvent::ChatMessage {
                    message: receipt.message,
                    messages_remaining: Some(receipt.messages_remaining),
                },
                Err(DomainError::Expired(_)) => RealtimeEvent::ChatExpired {
                    connection_id: payload.connection_id,
                },
                Err(DomainError::RateLimited(_)) => RealtimeEvent::ChatLimitReached {
                    connection_id: payload.connection_id,
                },
                Err(err) => error_event(&err.to_string()),
            })
        }
        "chat:typing" => {
            let Ok(payload) = serde_json::from_value::<TypingPayload>(frame.data) else {
                return Some(error_event("chat:typing requires connection_id"));
            };
            match state
                .chat
                .typing(user_id, &payload.connection_id, payload.is_typing)
                .await
            {
                Ok(_) => None,
                Err(err) => Some(error_event(&err.to_string())),
            }
        }
        "chat:read" => None,
        other => {
            tracing::debug!(user_id = %user_id, frame = %other, "unknown client frame");
            Some(error_event("unknown frame type"))
        }
    }
}

fn error_event(message: &str) -> RealtimeEvent {
    RealtimeEvent::Error {
        message: message.to_string(),
    }
}

async fn send_event(sender: &mut SocketSink, event: &RealtimeEvent) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, event = event.kind(), "failed to encode realtime event");
            return Ok(());
        }
    };
    sender.send(Message::Text(payload)).await
}
