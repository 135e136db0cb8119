//! DeletionCoordinator: per-user soft hide vs global redaction, plus the
//! undo path for the soft hide.

use chrono::Utc;
use shared::{
    domain::{ConversationId, DeleteScope, MessageId, UserId},
    error::ApiError,
    protocol::ServerEvent,
};
use storage::StoredMessage;

use crate::{ensure_participant, internal, is_admin, load_conversation, ApiContext};

pub async fn delete_messages(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
    message_ids: &[MessageId],
    scope: DeleteScope,
) -> Result<(), ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_participant(ctx, conversation_id, actor_id).await?;
    let targets = load_targets(ctx, conversation_id, message_ids).await?;

    match scope {
        DeleteScope::Me => {
            let _guard = ctx.locks.acquire(conversation_id).await;
            ctx.storage
                .hide_for_user(message_ids, actor_id)
                .await
                .map_err(internal)?;
            // only the requester's own clients apply this; nobody else is told
            ctx.hub.send_to_user(
                actor_id,
                &ServerEvent::MessageDeleted {
                    conversation_id,
                    message_ids: message_ids.to_vec(),
                    scope,
                    user_id: actor_id,
                },
            );
        }
        DeleteScope::Everyone => {
            let admin = is_admin(ctx, &conversation, actor_id).await?;
            let now = Utc::now();
            for message in &targets {
                if message.sender_id != actor_id && !admin {
                    return Err(ApiError::forbidden("Not allowed"));
                }
                if now.signed_duration_since(message.created_at) > ctx.everyone_delete_window {
                    return Err(ApiError::forbidden("Time limit exceeded"));
                }
            }
            let _guard = ctx.locks.acquire(conversation_id).await;
            ctx.storage
                .redact_messages(message_ids)
                .await
                .map_err(internal)?;
            ctx.hub.broadcast(
                conversation_id,
                &ServerEvent::MessageDeleted {
                    conversation_id,
                    message_ids: message_ids.to_vec(),
                    scope,
                    user_id: actor_id,
                },
                None,
            );
        }
    }
    Ok(())
}

/// Undo of a scope-"me" deletion: the requester becomes visible again and
/// only their own sessions are told to restore.
pub async fn undelete_messages(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
    message_ids: &[MessageId],
) -> Result<(), ApiError> {
    load_conversation(ctx, conversation_id).await?;
    ensure_participant(ctx, conversation_id, actor_id).await?;
    load_targets(ctx, conversation_id, message_ids).await?;

    let _guard = ctx.locks.acquire(conversation_id).await;
    ctx.storage
        .unhide_for_user(message_ids, actor_id)
        .await
        .map_err(internal)?;
    ctx.hub.send_to_user(
        actor_id,
        &ServerEvent::MessageUndeleted {
            conversation_id,
            message_ids: message_ids.to_vec(),
            user_id: actor_id,
        },
    );
    Ok(())
}

async fn load_targets(
    ctx: &ApiContext,
    conversation_id: ConversationId,
    message_ids: &[MessageId],
) -> Result<Vec<StoredMessage>, ApiError> {
    if message_ids.is_empty() {
        return Err(ApiError::invalid_argument("no messages selected"));
    }
    let mut targets = Vec::with_capacity(message_ids.len());
    for message_id in message_ids {
        let message = ctx
            .storage
            .load_message(*message_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("message not found"))?;
        if message.conversation_id != conversation_id {
            return Err(ApiError::not_found("message not found"));
        }
        targets.push(message);
    }
    Ok(targets)
}

#[cfg(test)]
#[path = "tests/deletion_tests.rs"]
mod tests;
