//! MessageIngest: validated sends and forwards, optimistic-send
//! reconciliation via the echoed client correlation token.

use shared::{
    domain::{ConversationId, MessageId, UserId},
    error::ApiError,
    protocol::{MessagePayload, ServerEvent},
};
use storage::{NewMessage, StoredReplyPreview};
use tracing::debug;
use url::Url;

use crate::{
    ensure_participant, internal, is_admin, load_conversation, message_payload, ApiContext,
};

const REPLY_PREVIEW_MAX_CHARS: usize = 120;

pub async fn send_message(
    ctx: &ApiContext,
    sender_id: UserId,
    conversation_id: ConversationId,
    content: Option<String>,
    attachment: Option<String>,
    client_id: Option<String>,
    reply_to: Option<MessageId>,
) -> Result<MessagePayload, ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_participant(ctx, conversation_id, sender_id).await?;

    let content = content
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());
    if content.is_none() && attachment.is_none() {
        return Err(ApiError::invalid_argument(
            "message needs content or an attachment",
        ));
    }
    if let Some(reference) = attachment.as_deref() {
        Url::parse(reference)
            .map_err(|_| ApiError::invalid_argument("attachment must be a valid URL"))?;
    }
    if conversation.only_admin_can_send && !is_admin(ctx, &conversation, sender_id).await? {
        return Err(ApiError::forbidden("Admin only"));
    }

    let reply_preview = resolve_reply_preview(ctx, conversation_id, reply_to).await;

    let _guard = ctx.locks.acquire(conversation_id).await;
    let message_id = ctx
        .storage
        .insert_message(&NewMessage {
            conversation_id,
            sender_id,
            content,
            attachment,
            reply_to,
            reply_preview,
            forwarded_from_user: None,
            forwarded_from_conversation: None,
        })
        .await
        .map_err(internal)?;
    ctx.storage
        .set_last_message(conversation_id, message_id)
        .await
        .map_err(internal)?;
    let stored = ctx
        .storage
        .load_message(message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| internal(anyhow::anyhow!("persisted message {message_id:?} missing")))?;

    let payload = message_payload(ctx, stored, client_id).await?;
    ctx.hub
        .broadcast(conversation_id, &ServerEvent::MessageNew(payload.clone()), None);
    Ok(payload)
}

pub async fn forward_message(
    ctx: &ApiContext,
    actor_id: UserId,
    source_message_id: MessageId,
    target_conversation_id: ConversationId,
) -> Result<MessagePayload, ApiError> {
    let source = ctx
        .storage
        .load_message(source_message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))?;

    // forwardable = visible to the actor: participant of the source
    // conversation, not hidden for them, not a tombstone
    ensure_participant(ctx, source.conversation_id, actor_id).await?;
    if ctx
        .storage
        .is_hidden_for(source_message_id, actor_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::not_found("message not found"));
    }
    if source.is_deleted {
        return Err(ApiError::invalid_operation("message was deleted"));
    }

    load_conversation(ctx, target_conversation_id).await?;
    ensure_participant(ctx, target_conversation_id, actor_id).await?;

    let _guard = ctx.locks.acquire(target_conversation_id).await;
    let message_id = ctx
        .storage
        .insert_message(&NewMessage {
            conversation_id: target_conversation_id,
            sender_id: actor_id,
            content: source.content.clone(),
            attachment: source.attachment.clone(),
            reply_to: None,
            reply_preview: None,
            forwarded_from_user: Some(source.sender_id),
            forwarded_from_conversation: Some(source.conversation_id),
        })
        .await
        .map_err(internal)?;
    ctx.storage
        .set_last_message(target_conversation_id, message_id)
        .await
        .map_err(internal)?;
    let stored = ctx
        .storage
        .load_message(message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| internal(anyhow::anyhow!("persisted message {message_id:?} missing")))?;

    let payload = message_payload(ctx, stored, None).await?;
    ctx.hub.broadcast(
        target_conversation_id,
        &ServerEvent::MessageNew(payload.clone()),
        None,
    );
    Ok(payload)
}

/// Best-effort reply context. Any lookup failure or cross-conversation
/// target drops the preview; the send itself proceeds.
async fn resolve_reply_preview(
    ctx: &ApiContext,
    conversation_id: ConversationId,
    reply_to: Option<MessageId>,
) -> Option<StoredReplyPreview> {
    let reply_to = reply_to?;
    let target = match ctx.storage.load_message(reply_to).await {
        Ok(Some(message)) if message.conversation_id == conversation_id && !message.is_deleted => {
            message
        }
        Ok(_) => return None,
        Err(err) => {
            debug!(%err, "reply preview lookup failed");
            return None;
        }
    };
    let sender_name = match ctx.storage.get_user(target.sender_id).await {
        Ok(Some(user)) => user.name,
        Ok(None) => return None,
        Err(err) => {
            debug!(%err, "reply preview sender lookup failed");
            return None;
        }
    };
    Some(StoredReplyPreview {
        sender_name,
        content: target.content.map(truncate_chars),
        has_attachment: target.attachment.is_some(),
    })
}

fn truncate_chars(text: String) -> String {
    if text.chars().count() <= REPLY_PREVIEW_MAX_CHARS {
        text
    } else {
        text.chars().take(REPLY_PREVIEW_MAX_CHARS).collect()
    }
}

#[cfg(test)]
#[path = "tests/messages_tests.rs"]
mod tests;
