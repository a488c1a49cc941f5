//! WebSocket transport: connection lifecycle and frame dispatch.
//!
//! One task per connection.  The upgrade is authenticated with an
//! integrity token over `connect:{user_id}`; after that, each mutating
//! frame carries its own token over the frame's canonical arguments and
//! is verified before any side effect.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use causerie_shared::protocol::{ClientFrame, ServerEvent};
use causerie_shared::types::{ConnectionId, UserId};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use causerie_shared::constants::OUTBOUND_BUFFER;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Deserialize)]
pub struct WsQuery {
    user_id: i64,
    token: String,
}

/// Handle the WebSocket upgrade: verify the connection credential and the
/// user's existence before accepting.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let user = UserId(query.user_id);

    if !state
        .integrity
        .verify(&["connect", &query.user_id.to_string()], &query.token)
    {
        warn!(user = %user, "websocket upgrade rejected: bad connect token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !state.directory.user_exists(user).await {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserId) {
    let conn = ConnectionId::new();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    let came_online = state.registry.register(user, conn, tx.clone());
    info!(user = %user, conn = ?conn, came_online, "websocket connected");
    if came_online {
        state.presence.went_online(user).await;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drain the per-connection channel onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: one frame at a time, dispatched inline so a
    // connection's own operations stay ordered.
    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                debug!(user = %user, error = %e, "websocket read error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                if !state.limiter.check(user) {
                    let _ = tx
                        .send(ServerEvent::Error {
                            reason: "rate limit exceeded".to_string(),
                        })
                        .await;
                    continue;
                }
                dispatch(&state, user, conn, &tx, text.as_str()).await;
            }
            Message::Close(_) => break,
            // Ping/pong are handled by the protocol layer; binary frames
            // have no meaning here.
            _ => {}
        }
    }

    let went_offline = state.registry.unregister(user, conn);
    let remaining = state.registry.connections_of(user).len();
    info!(user = %user, conn = ?conn, went_offline, remaining, "websocket disconnected");
    if went_offline {
        state.presence.went_offline(user).await;
    }

    drop(tx);
    let _ = writer.await;
}

/// Parse and execute one frame.  Any rejection surfaces as a single
/// `error` event to this connection and nothing else.
async fn dispatch(
    state: &AppState,
    user: UserId,
    origin: ConnectionId,
    tx: &mpsc::Sender<ServerEvent>,
    raw: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(user = %user, error = %e, "malformed frame");
            reply(
                tx,
                ServerEvent::Error {
                    reason: "malformed frame".to_string(),
                },
            )
            .await;
            return;
        }
    };

    if let Err(error) = handle_frame(state, user, origin, tx, frame).await {
        reply(tx, error.event()).await;
    }
}

async fn handle_frame(
    state: &AppState,
    user: UserId,
    origin: ConnectionId,
    tx: &mpsc::Sender<ServerEvent>,
    frame: ClientFrame,
) -> Result<(), ServerError> {
    match frame {
        ClientFrame::SendMessage {
            recipient_id,
            content,
            kind,
            attachments,
            token,
        } => {
            verify(
                state,
                &[&user.to_string(), &recipient_id.to_string(), &content],
                &token,
            )?;
            let view = state
                .pipeline
                .send(user, origin, recipient_id, content, kind, attachments)
                .await?;
            reply(tx, ServerEvent::MessageSent { message: view }).await;
        }
        ClientFrame::Typing {
            recipient_id,
            token,
        } => {
            verify(
                state,
                &["typing", &user.to_string(), &recipient_id.to_string()],
                &token,
            )?;
            state.pipeline.typing(user, recipient_id).await?;
        }
        ClientFrame::MarkRead { chat_id, token } => {
            verify(
                state,
                &["read", &user.to_string(), &chat_id.to_string()],
                &token,
            )?;
            state.pipeline.mark_read(user, chat_id).await?;
        }
        ClientFrame::CreateChat {
            recipient_id,
            token,
        } => {
            verify(
                state,
                &["chat", &user.to_string(), &recipient_id.to_string()],
                &token,
            )?;
            let (chat, created) = state.pipeline.create_chat(user, recipient_id).await?;
            if !created {
                // The other party was already notified at creation time;
                // just hand the existing thread back to the caller.
                reply(tx, ServerEvent::ChatCreated { chat }).await;
            }
        }
        ClientFrame::EditMessage {
            message_id,
            new_content,
            token,
        } => {
            verify(
                state,
                &[
                    "edit",
                    &user.to_string(),
                    &message_id.to_string(),
                    &new_content,
                ],
                &token,
            )?;
            state.pipeline.edit(user, message_id, new_content).await?;
        }
        ClientFrame::UnsendMessage { message_id, token } => {
            verify(
                state,
                &["unsend", &user.to_string(), &message_id.to_string()],
                &token,
            )?;
            state.pipeline.unsend(user, message_id).await?;
        }
        ClientFrame::FetchMessages {
            chat_id,
            page,
            page_size,
        } => {
            let messages = state.pipeline.history(user, chat_id, page, page_size).await?;
            reply(
                tx,
                ServerEvent::MessageHistory {
                    chat_id,
                    page,
                    messages,
                },
            )
            .await;
        }
    }
    Ok(())
}

fn verify(state: &AppState, parts: &[&str], token: &str) -> Result<(), ServerError> {
    if state.integrity.verify(parts, token) {
        Ok(())
    } else {
        Err(ServerError::Auth("invalid integrity token".to_string()))
    }
}

async fn reply(tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if tx.send(event).await.is_err() {
        debug!("reply dropped: connection closed");
    }
}
