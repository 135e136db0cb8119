//! Conversation lifecycle and session attachment: create/list/fetch,
//! the room join handshake, and profile updates.

use presence::SessionId;
use shared::{
    domain::{ConversationId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{ConversationPayload, ConversationSnapshot, UserSummary},
};

use crate::{
    conversation_payload, ensure_participant, internal, load_conversation, message_payload_with,
    ApiContext, UserCache,
};

/// Direct conversations are unique per user pair: an existing one is
/// returned instead of creating a duplicate.
pub async fn create_direct(
    ctx: &ApiContext,
    actor_id: UserId,
    other_id: UserId,
) -> Result<ConversationPayload, ApiError> {
    if actor_id == other_id {
        return Err(ApiError::invalid_argument(
            "cannot start a conversation with yourself",
        ));
    }
    if ctx.storage.get_user(other_id).await.map_err(internal)?.is_none() {
        return Err(ApiError::not_found("user not found"));
    }

    let conversation_id = match ctx
        .storage
        .find_direct(actor_id, other_id)
        .await
        .map_err(internal)?
    {
        Some(existing) => existing,
        None => ctx
            .storage
            .create_direct(actor_id, other_id)
            .await
            .map_err(internal)?,
    };
    let conversation = load_conversation(ctx, conversation_id).await?;
    conversation_payload(ctx, &conversation).await
}

pub async fn create_group(
    ctx: &ApiContext,
    actor_id: UserId,
    name: &str,
    description: Option<&str>,
    avatar: Option<&str>,
    members: &[UserId],
) -> Result<ConversationPayload, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::invalid_argument("group name is required"));
    }
    let conversation_id = ctx
        .storage
        .create_group(actor_id, name, description, avatar, members)
        .await
        .map_err(internal)?;
    let conversation = load_conversation(ctx, conversation_id).await?;
    conversation_payload(ctx, &conversation).await
}

pub async fn get_conversation(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
) -> Result<ConversationPayload, ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_participant(ctx, conversation_id, actor_id).await?;
    conversation_payload(ctx, &conversation).await
}

/// The home-screen summary list, newest activity first, with the
/// server-authoritative unread counter per conversation.
pub async fn list_conversations(
    ctx: &ApiContext,
    actor_id: UserId,
) -> Result<Vec<ConversationPayload>, ApiError> {
    let stored = ctx
        .storage
        .list_conversations_for_user(actor_id)
        .await
        .map_err(internal)?;
    let mut payloads = Vec::with_capacity(stored.len());
    for conversation in &stored {
        let mut payload = conversation_payload(ctx, conversation).await?;
        payload.unread_count = Some(
            ctx.storage
                .unread_count(conversation.conversation_id, actor_id)
                .await
                .map_err(internal)?,
        );
        payloads.push(payload);
    }
    Ok(payloads)
}

/// The `joinConversation` handshake: validates the user against the store,
/// registers the session in the room, and returns the conversation plus a
/// page of recent history for the client to render.
pub async fn join_conversation(
    ctx: &ApiContext,
    session_id: SessionId,
    user_id: UserId,
    conversation_id: ConversationId,
    history_limit: u32,
) -> Result<ConversationSnapshot, ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_participant(ctx, conversation_id, user_id).await?;
    ctx.hub.registry().join(session_id, conversation_id);

    let stored = ctx
        .storage
        .list_messages(conversation_id, user_id, history_limit, None)
        .await
        .map_err(internal)?;
    let mut cache = UserCache::default();
    let mut messages = Vec::with_capacity(stored.len());
    for message in stored {
        messages.push(message_payload_with(ctx, &mut cache, message, None).await?);
    }
    Ok(ConversationSnapshot {
        conversation: conversation_payload(ctx, &conversation).await?,
        messages,
    })
}

/// Lightweight room attachment for summary updates; no history page.
pub async fn subscribe(
    ctx: &ApiContext,
    session_id: SessionId,
    user_id: UserId,
    conversation_id: ConversationId,
) -> Result<(), ApiError> {
    load_conversation(ctx, conversation_id).await?;
    ensure_participant(ctx, conversation_id, user_id).await?;
    ctx.hub.registry().join(session_id, conversation_id);
    Ok(())
}

pub async fn update_profile(
    ctx: &ApiContext,
    user_id: UserId,
    name: Option<String>,
    avatar: Option<String>,
) -> Result<UserSummary, ApiError> {
    if ctx.storage.get_user(user_id).await.map_err(internal)?.is_none() {
        return Err(ApiError::new(ErrorCode::Unauthorized, "unknown user"));
    }
    let name = name.map(|value| value.trim().to_string());
    if let Some(name) = name.as_deref() {
        if name.is_empty() {
            return Err(ApiError::invalid_argument("name cannot be empty"));
        }
    }
    ctx.storage
        .update_user_profile(user_id, name.as_deref(), avatar.as_deref())
        .await
        .map_err(internal)?;
    let user = ctx
        .storage
        .get_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| internal(anyhow::anyhow!("profile vanished during update")))?;
    Ok(UserSummary {
        id: user.user_id,
        name: user.name,
        avatar: user.avatar,
    })
}

#[cfg(test)]
#[path = "tests/conversations_tests.rs"]
mod tests;
