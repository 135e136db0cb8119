//! The bidirectional event channel: one socket per session, intents in,
//! acks and room events out through the session's ordered queue.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use presence::SessionId;
use serde::Deserialize;
use server_api::{conversations, deletion, messages, read};
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
    protocol::{AckFrame, ClientFrame, ClientIntent, Envelope, ServerEvent},
};
use tracing::{debug, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    user_id: i64,
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket, UserId(q.user_id)))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, user_id: UserId) {
    // identity comes from the auth layer in front of this service; sockets
    // for unknown ids are dropped before any session state is created
    match state.api.storage.get_user(user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            debug!(user_id = user_id.0, "rejecting socket for unknown user");
            return;
        }
        Err(err) => {
            warn!(%err, "user lookup failed during connect");
            return;
        }
    }

    let (mut sender, mut receiver) = socket.split();
    let (session_id, mut events_rx) = state.api.hub.registry().connect(user_id);

    let send_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(raw) = message else {
            continue;
        };
        let frame: ClientFrame = match serde_json::from_str(&raw) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%err, "dropping malformed frame");
                state.api.hub.send_to_session(
                    session_id,
                    ServerEvent::Error(ApiError::invalid_argument("malformed frame")),
                );
                continue;
            }
        };
        let seq = frame.seq;
        let result = handle_intent(&state, session_id, user_id, frame.intent).await;
        if let Some(seq) = seq {
            let body = match result {
                Ok(Some(data)) => Envelope::ok(data),
                Ok(None) => Envelope::ok_empty(),
                Err(err) => Envelope::err(err.message),
            };
            state
                .api
                .hub
                .send_to_session(session_id, ServerEvent::Ack(AckFrame { seq, body }));
        }
    }

    // dropping the session releases every room membership it held
    state.api.hub.registry().disconnect(session_id);
    send_task.abort();
}

async fn handle_intent(
    state: &AppState,
    session_id: SessionId,
    user_id: UserId,
    intent: ClientIntent,
) -> Result<Option<serde_json::Value>, ApiError> {
    let ctx = &state.api;
    match intent {
        ClientIntent::JoinConversation { conversation_id } => {
            let snapshot = conversations::join_conversation(
                ctx,
                session_id,
                user_id,
                conversation_id,
                state.join_history_limit,
            )
            .await?;
            Ok(Some(to_value(snapshot)?))
        }
        ClientIntent::LeaveConversation { conversation_id }
        | ClientIntent::Unsubscribe { conversation_id } => {
            ctx.hub.registry().leave(session_id, conversation_id);
            Ok(None)
        }
        ClientIntent::Subscribe { conversation_id } => {
            conversations::subscribe(ctx, session_id, user_id, conversation_id).await?;
            Ok(None)
        }
        ClientIntent::SendMessage {
            conversation_id,
            content,
            attachment,
            client_id,
            reply_to,
        } => {
            let payload = messages::send_message(
                ctx,
                user_id,
                conversation_id,
                content,
                attachment,
                client_id,
                reply_to,
            )
            .await?;
            Ok(Some(to_value(payload)?))
        }
        ClientIntent::DeleteMessages {
            conversation_id,
            message_ids,
            scope,
        } => {
            deletion::delete_messages(ctx, user_id, conversation_id, &message_ids, scope).await?;
            Ok(None)
        }
        ClientIntent::UndeleteMessages {
            conversation_id,
            message_ids,
        } => {
            deletion::undelete_messages(ctx, user_id, conversation_id, &message_ids).await?;
            Ok(None)
        }
        ClientIntent::ForwardMessage {
            source_message_id,
            target_conversation_id,
        } => {
            let payload =
                messages::forward_message(ctx, user_id, source_message_id, target_conversation_id)
                    .await?;
            Ok(Some(to_value(payload)?))
        }
        ClientIntent::MarkRead { conversation_id } => {
            read::mark_read(ctx, user_id, conversation_id).await?;
            Ok(None)
        }
        ClientIntent::Typing { conversation_id } => {
            if !ctx.hub.registry().is_member(session_id, conversation_id) {
                return Err(ApiError::forbidden("join the conversation first"));
            }
            ctx.hub.broadcast(
                conversation_id,
                &ServerEvent::Typing {
                    conversation_id,
                    user_id,
                },
                Some(session_id),
            );
            Ok(None)
        }
        ClientIntent::StopTyping { conversation_id } => {
            if !ctx.hub.registry().is_member(session_id, conversation_id) {
                return Err(ApiError::forbidden("join the conversation first"));
            }
            ctx.hub.broadcast(
                conversation_id,
                &ServerEvent::StopTyping {
                    conversation_id,
                    user_id,
                },
                Some(session_id),
            );
            Ok(None)
        }
        ClientIntent::UpdateProfile { name, avatar } => {
            let profile = conversations::update_profile(ctx, user_id, name, avatar).await?;
            Ok(Some(to_value(profile)?))
        }
    }
}

fn to_value<T: serde::Serialize>(data: T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(data).map_err(|err| {
        warn!(%err, "ack payload serialization failed");
        ApiError::new(ErrorCode::Internal, "internal error")
    })
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
